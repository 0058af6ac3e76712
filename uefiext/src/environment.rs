/// Firmware execution environments
///
/// Exactly one environment is active for a session. It starts as DXE and
/// only changes through `setenv` or detection at `init`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown environment type '{0}'! Supported types: PEI, DXE, MM, rust")]
pub struct UnknownEnvironment(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    Pei,
    #[default]
    Dxe,
    Mm,
    /// Rust based firmware debugger
    Rust,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Pei,
        Environment::Dxe,
        Environment::Mm,
        Environment::Rust,
    ];

    /// Literal accepted by `setenv`
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Pei => "PEI",
            Environment::Dxe => "DXE",
            Environment::Mm => "MM",
            Environment::Rust => "rust",
        }
    }

    /// Extension command that discovers loaded images once this environment is known
    pub fn discovery_command(&self) -> &'static str {
        match self {
            Environment::Dxe => "!uefiext.findall",
            _ => "!uefiext.findmodule",
        }
    }
}

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Environment::ALL
            .into_iter()
            .find(|env| env.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEnvironment(s.to_string()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_dxe() {
        assert_eq!(Environment::default(), Environment::Dxe);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let cases = [
            ("PEI", Environment::Pei),
            ("pei", Environment::Pei),
            ("PeI", Environment::Pei),
            ("dxe", Environment::Dxe),
            ("Mm", Environment::Mm),
            ("rust", Environment::Rust),
            ("RUST", Environment::Rust),
            (" dxe ", Environment::Dxe),
        ];

        for (input, expected) in &cases {
            assert_eq!(input.parse::<Environment>().unwrap(), *expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for input in ["xyz", "", "PEIM", "dxe2", "smm"] {
            let err = input.parse::<Environment>().unwrap_err();
            assert_eq!(err, UnknownEnvironment(input.to_string()));
        }
    }

    #[test]
    fn test_discovery_command() {
        assert_eq!(Environment::Dxe.discovery_command(), "!uefiext.findall");
        assert_eq!(Environment::Rust.discovery_command(), "!uefiext.findmodule");
        assert_eq!(Environment::Pei.discovery_command(), "!uefiext.findmodule");
        assert_eq!(Environment::Mm.discovery_command(), "!uefiext.findmodule");
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for env in Environment::ALL {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), env);
        }
    }
}
