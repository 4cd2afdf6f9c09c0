//! Built-in plugins bundled with the binary.

mod logs;
mod networking;
mod system;

pub use logs::Logs;
pub use networking::Networking;
pub use system::System;

use super::{Plugin, PluginFactory};

/// The bundled registration table, in candidate-name order.
pub fn all() -> Vec<(&'static str, PluginFactory)> {
    vec![
        ("logs", || Box::new(Logs) as Box<dyn Plugin>),
        ("networking", || Box::new(Networking) as Box<dyn Plugin>),
        ("system", || Box::new(System) as Box<dyn Plugin>),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_match_declarations() {
        for (name, factory) in all() {
            assert_eq!(factory().declaration().name, name);
        }
    }
}
