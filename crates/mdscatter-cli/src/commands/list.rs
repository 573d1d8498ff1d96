use crate::cli::ListArgs;
use crate::error::Result;
use mdscatter::workflows::registry;
use std::fmt::Write;

pub fn run(args: ListArgs) -> Result<()> {
    let text = match args.name {
        Some(name) => describe(&name)?,
        None => overview(),
    };
    print!("{text}");
    Ok(())
}

/// One line per registered analysis.
fn overview() -> String {
    let names = registry::analysis_names();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0);
    let mut text = String::from("Available analyses:\n");
    for name in names {
        if let Ok(entry) = registry::entry(name) {
            let _ = writeln!(text, "  {:<width$}  {}", name, entry.description);
        }
    }
    text
}

/// The settings table of one analysis.
fn describe(name: &str) -> Result<String> {
    let entry = registry::entry(name)?;
    let settings = (entry.settings)();
    let width = settings.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut text = format!("{} - {}\n\nSettings:\n", entry.name, entry.description);
    for setting in settings {
        let requirement = match (&setting.default, setting.optional) {
            (Some(default), _) => format!("default {default}"),
            (None, true) => "optional".to_string(),
            (None, false) => "required".to_string(),
        };
        let _ = writeln!(
            text,
            "  {:<width$}  {:<22} {:<24} {}",
            setting.name,
            setting.kind.type_tag(),
            requirement,
            setting.help
        );
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use mdscatter::engine::error::JobError;

    #[test]
    fn overview_lists_every_analysis() {
        let text = overview();
        for name in registry::analysis_names() {
            assert!(text.contains(name), "{name} missing");
        }
    }

    #[test]
    fn describe_shows_settings_and_defaults() {
        let text = describe("SolventAccessibleSurface").unwrap();
        assert!(text.starts_with("SolventAccessibleSurface"));
        let probe = text.lines().find(|l| l.trim_start().starts_with("probe_radius")).unwrap();
        assert!(probe.contains("float"));
        assert!(probe.contains("default 0.14"));
        let trajectory = text.lines().find(|l| l.trim_start().starts_with("trajectory")).unwrap();
        assert!(trajectory.contains("required"));
    }

    #[test]
    fn describe_rejects_unknown_names() {
        assert!(matches!(describe("Nope"), Err(CliError::Job(JobError::UnknownJob(_)))));
    }
}
