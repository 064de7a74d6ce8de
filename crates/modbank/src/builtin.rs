use modbank_sdk::{ConfigOption, ModuleDecl, OptionKind};

use crate::config::DEFAULT_MAX_DEPTH;

/// Object name of the module describing the bank itself.
pub const MAIN_MODULE: &str = "main";

/// Declaration of the always present core module. It provides no capability
/// and only carries the bank's own options.
pub fn main_module() -> ModuleDecl {
    ModuleDecl::new(MAIN_MODULE)
        .long_name("Module bank core")
        .help("Settings of plugin discovery and the plugin cache.")
        .option(ConfigOption::new(
            "plugin-path",
            "Additional plugin search path",
            OptionKind::String {
                default: None,
                choices: Vec::new(),
            },
        ))
        .option(ConfigOption::new(
            "plugins-cache",
            "Use a plugins cache",
            OptionKind::Bool { default: true },
        ))
        .option(
            ConfigOption::new(
                "reset-plugins-cache",
                "Reset the plugins cache",
                OptionKind::Bool { default: false },
            )
            .unsaveable(),
        )
        .option(ConfigOption::new(
            "plugin-scan-depth",
            "Directory levels searched below each plugin root",
            OptionKind::Integer {
                default: DEFAULT_MAX_DEPTH as i64,
                range: Some((0, 32)),
            },
        ))
}
