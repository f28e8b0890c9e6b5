pub mod apply;
pub mod config;
pub mod info;
pub mod motion;
pub mod register;

use clap::ValueEnum;
use indicatif::ProgressBar;
use volreg_core::interpolation::Interpolation;
use volreg_core::pipeline::ProgressReporter;
use volreg_core::register::CostType;

/// Drives a progress bar from core progress reports.
pub struct BarReporter(pub ProgressBar);

impl ProgressReporter for BarReporter {
    fn report_progress(&self, current: usize, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(current as u64);
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum InterpolationArg {
    Nearest,
    Linear,
    Cubic,
}

impl From<InterpolationArg> for Interpolation {
    fn from(arg: InterpolationArg) -> Self {
        match arg {
            InterpolationArg::Nearest => Interpolation::Nearest,
            InterpolationArg::Linear => Interpolation::Linear,
            InterpolationArg::Cubic => Interpolation::Cubic,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CostArg {
    Mi,
    Correlation,
    Skip,
}

impl From<CostArg> for CostType {
    fn from(arg: CostArg) -> Self {
        match arg {
            CostArg::Mi => CostType::MutualInformation,
            CostArg::Correlation => CostType::Correlation,
            CostArg::Skip => CostType::Skip,
        }
    }
}
