use console::style;
use crate::cli::commands::ValidateArgs;
use crate::config;
use crate::errors::PocScanError;
use crate::rules::{load_bundled, load_rules};

/// Compile every rule and report problems. Fails when any rule is
/// defective or unreadable.
pub async fn handle_validate(args: ValidateArgs) -> Result<(), PocScanError> {
    if let Some(path) = &args.config {
        config::parse_config(path).await?;
        println!("Configuration is valid: {}", path.display());
    }

    let mut set = load_rules(&args.rules)?;
    if args.builtin {
        set.merge(load_bundled());
    }
    let mut problems = 0;

    for (path, error) in &set.unreadable {
        problems += 1;
        println!("  {} {} {}", style("[x]").red(), path.display(), error);
    }
    for rule in set.defective() {
        problems += 1;
        println!(
            "  {} {} {}",
            style("[x]").red(),
            rule.id,
            rule.defect.as_deref().unwrap_or_default()
        );
    }

    println!("  {} rules loaded, {} problems", set.len(), problems);
    if problems > 0 {
        return Err(PocScanError::RuleDefinition(format!("{} rule problems found", problems)));
    }
    Ok(())
}
