//! Output formatting and styling

use std::io::IsTerminal;

use colored::Colorize;

/// Output styling configuration
pub struct OutputStyle {
    /// Whether to emit ANSI colors
    pub use_colors: bool,
}

impl Default for OutputStyle {
    fn default() -> Self {
        Self {
            use_colors: std::io::stdout().is_terminal(),
        }
    }
}

impl OutputStyle {
    /// Style with colors forced off
    pub fn plain() -> Self {
        Self { use_colors: false }
    }

    /// Format success message
    pub fn success(&self, msg: &str) -> String {
        if self.use_colors {
            format!("{} {}", "✓".green().bold(), msg)
        } else {
            format!("✓ {}", msg)
        }
    }

    /// Format error message
    pub fn error(&self, msg: &str) -> String {
        if self.use_colors {
            format!("{} {}", "✗".red().bold(), msg)
        } else {
            format!("✗ {}", msg)
        }
    }

    /// Format warning message
    pub fn warning(&self, msg: &str) -> String {
        if self.use_colors {
            format!("{} {}", "⚠".yellow(), msg)
        } else {
            format!("⚠ {}", msg)
        }
    }

    /// Format section header
    pub fn header(&self, title: &str) -> String {
        if self.use_colors {
            title.bold().underline().to_string()
        } else {
            title.to_string()
        }
    }

    /// Format a `key: value` line
    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.use_colors {
            format!("  {}: {}", key.cyan(), value)
        } else {
            format!("  {}: {}", key, value)
        }
    }

    /// Text progress bar, e.g. `[#####-----]  50%`
    pub fn progress_bar(&self, percent: u8) -> String {
        let filled = usize::from(percent.min(100)) / 5;
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(20 - filled));
        if self.use_colors {
            format!("[{}] {:>3}%", bar.green(), percent)
        } else {
            format!("[{}] {:>3}%", bar, percent)
        }
    }
}

/// Print success message
pub fn print_success(msg: &str) {
    println!("{}", OutputStyle::default().success(msg));
}

/// Print error message
pub fn print_error(msg: &str) {
    eprintln!("{}", OutputStyle::default().error(msg));
}

/// Print warning message
pub fn print_warning(msg: &str) {
    println!("{}", OutputStyle::default().warning(msg));
}
