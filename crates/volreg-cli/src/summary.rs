use std::path::Path;

use console::Style;
use volreg_core::pipeline::{RegistrationConfig, RegistrationResult};
use volreg_core::volume::Volume;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn print_volume_line(s: &Styles, label: &str, path: &Path, volume: &Volume) {
    println!(
        "  {:<14}{}",
        s.label.apply_to(label),
        s.path.apply_to(path.display())
    );
    println!(
        "  {:<14}{}  {}",
        "",
        s.value.apply_to(volume.geometry()),
        s.label.apply_to(volume.voxel_size)
    );
}

pub fn print_registration_summary(
    config: &RegistrationConfig,
    template_path: &Path,
    template: &Volume,
    subject_path: &Path,
    subject: &Volume,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Volume Registration"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(19)));
    println!();

    print_volume_line(&s, "Template", template_path, template);
    print_volume_line(&s, "Subject", subject_path, subject);
    println!();

    // Linear
    println!("  {}", s.header.apply_to("Linear"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Type"),
        s.method.apply_to(config.reg_type)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Cost"),
        s.method.apply_to(config.cost)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Bidirectional"),
        s.value.apply_to(if config.bidirectional { "yes" } else { "no" })
    );
    println!();

    // Nonlinear
    let nl = &config.nonlinear;
    println!("  {}", s.header.apply_to("Nonlinear"));
    match config.edge {
        Some(true) => println!("    {:<14}{}", s.label.apply_to("Edge"), s.value.apply_to("on")),
        Some(false) => println!("    {:<14}{}", s.label.apply_to("Edge"), s.disabled.apply_to("off")),
        None => println!("    {:<14}{}", s.label.apply_to("Edge"), s.disabled.apply_to("auto")),
    }
    println!(
        "    {:<14}{}",
        s.label.apply_to("Resolution"),
        s.value.apply_to(format!("1/{}", 1usize << nl.resolution.min(16)))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Smoothness"),
        s.value.apply_to(nl.smoothness)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Constraint"),
        s.value.apply_to(nl.constraint)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(nl.iterations)
    );
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Interpolation"),
        s.method.apply_to(config.interpolation)
    );
    match config.threads {
        Some(n) => println!("  {:<14}{}", s.label.apply_to("Threads"), s.value.apply_to(n)),
        None => println!("  {:<14}{}", s.label.apply_to("Threads"), s.disabled.apply_to("all")),
    }
    println!();
}

pub fn print_result_summary(result: &RegistrationResult, output: &Path, mapping: Option<&Path>) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Linear r"),
        s.value.apply_to(format!("{:.4}", result.linear_correlation))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Nonlinear r"),
        s.value.apply_to(format!("{:.4}", result.nonlinear_correlation))
    );
    let p = &result.transform.params;
    println!(
        "    {:<14}{}",
        s.label.apply_to("Translation"),
        s.value.apply_to(format!(
            "{:.2} {:.2} {:.2} mm",
            p.translation[0], p.translation[1], p.translation[2]
        ))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Rotation"),
        s.value.apply_to(format!(
            "{:.2} {:.2} {:.2} deg",
            p.rotation[0].to_degrees(),
            p.rotation[1].to_degrees(),
            p.rotation[2].to_degrees()
        ))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Max shift"),
        s.value.apply_to(format!("{:.2} voxels", result.field.max_magnitude()))
    );
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    match mapping {
        Some(path) => println!("  {:<14}{}", s.label.apply_to("Mapping"), s.path.apply_to(path.display())),
        None => println!("  {:<14}{}", s.label.apply_to("Mapping"), s.disabled.apply_to("not saved")),
    }
    println!();
}
