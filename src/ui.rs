//! Output functions for consistent CLI formatting

use console::style;

/// Display a section header
pub fn section(title: &str) {
    println!("{}", style(title).bold());
}

/// Display a success step
pub fn step_ok(message: &str) {
    println!("  {} {}", style("[OK]").green(), message);
}

/// Display a success step with detail
pub fn step_ok_detail(message: &str, detail: &str) {
    println!("  {} {} ({})", style("[OK]").green(), message, style(detail).dim());
}

/// Display a warning step with hint
pub fn step_warn_hint(message: &str, hint: &str) {
    println!(
        "  {} {} - {}",
        style("[WARN]").yellow(),
        message,
        style(hint).dim()
    );
}

/// Print styled key-value pair
pub fn key_value(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}
