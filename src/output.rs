//! Terminal output for operation results.

use colored::Colorize;

use crate::orchestrator::UpgradeReport;
use crate::phases::Notice;

/// One-line result of an upgrade.
pub fn upgrade_summary(report: &UpgradeReport, namespace: &str) -> String {
    if !report.updated {
        return format!("No update required in '{namespace}'");
    }
    if report.previous_version == report.version {
        format!("Site in '{namespace}' updated")
    } else {
        format!(
            "Site in '{namespace}' updated from {} to {}",
            report.previous_version, report.version
        )
    }
}

/// Print the upgrade result followed by any notices.
pub fn print_upgrade_report(report: &UpgradeReport, namespace: &str) {
    let summary = upgrade_summary(report, namespace);
    if report.updated {
        println!("{} {}", "✓".green(), summary);
    } else {
        println!("{} {}", "ℹ".blue(), summary);
    }

    if let Some(migration) = &report.migration {
        if !migration.created.is_empty() {
            println!(
                "  Migrated {} objects to current names",
                migration.created.len().to_string().bold()
            );
        }
    }
    if !report.deleted.is_empty() {
        println!(
            "  Removed legacy objects: {}",
            report.deleted.join(", ").dimmed()
        );
    }

    for notice in report.notices() {
        print_notice(notice);
    }
}

pub fn print_notice(notice: &Notice) {
    match notice {
        Notice::ConsoleAddress(_) => println!("{} {}", "ℹ".blue(), notice),
        Notice::RelinkRequired => println!("{} {}", "⚠".yellow(), notice.to_string().yellow()),
    }
}

/// Print the result of a settings operation.
pub fn print_setting_result(what: &str, changed: bool) {
    if changed {
        println!("{} {} updated", "✓".green(), what);
    } else {
        println!("{} {} unchanged", "ℹ".blue(), what);
    }
}
