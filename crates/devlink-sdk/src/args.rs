//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Command line and environment overlay parser."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use devlink_common::{DevlinkError, Result};

/// Environment variable that presets the registry URL. An explicit
/// `-r/--registry` flag overrides it.
pub const REGISTRY_ENV: &str = "DEVLINK_REGISTRY";

/// Options consumed by the SDK from the service's command line.
///
/// The SDK owns only its four options; everything else is handed back to
/// the embedding service unchanged and in order. `registry` is `Some("")`
/// when the flag appeared bare, meaning "use the discoverable default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub name: Option<String>,
    pub registry: Option<String>,
    pub profile: Option<String>,
    pub conf_dir: Option<String>,
}

impl CommandLine {
    /// Parse process arguments (without the program name), overlaying the
    /// `DEVLINK_REGISTRY` environment preset. Returns the parsed options and
    /// the unconsumed arguments.
    pub fn parse<I, S>(args: I) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::parse_with_env(args, std::env::var(REGISTRY_ENV).ok())
    }

    /// Like [`CommandLine::parse`] with the environment preset injected,
    /// for deterministic tests.
    pub fn parse_with_env<I, S>(args: I, registry_env: Option<String>) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut parsed = CommandLine {
            registry: registry_env,
            ..CommandLine::default()
        };
        let mut rest = Vec::new();

        let mut index = 0;
        while index < tokens.len() {
            let token = &tokens[index];
            let (arg, eq_value) = match token.split_once('=') {
                Some((arg, value)) => (arg, Some(value)),
                None => (token.as_str(), None),
            };
            let lookahead = match eq_value {
                Some(value) => Some(value),
                None => tokens.get(index + 1).map(String::as_str),
            };
            let consumed_with_value = if eq_value.is_some() { 1 } else { 2 };

            match arg {
                "-r" | "--registry" => match lookahead {
                    // A following token that looks like another option means
                    // the flag appeared bare.
                    Some(value) if !value.is_empty() && !value.starts_with('-') => {
                        parsed.registry = Some(value.to_owned());
                        index += consumed_with_value;
                    }
                    _ => {
                        if parsed.registry.is_none() {
                            parsed.registry = Some(String::new());
                        }
                        index += 1;
                    }
                },
                "-n" | "--name" => {
                    parsed.name = Some(Self::required_value(arg, lookahead)?);
                    index += consumed_with_value;
                }
                "-p" | "--profile" => {
                    parsed.profile = Some(Self::required_value(arg, lookahead)?);
                    index += consumed_with_value;
                }
                "-c" | "--confdir" => {
                    parsed.conf_dir = Some(Self::required_value(arg, lookahead)?);
                    index += consumed_with_value;
                }
                _ => {
                    rest.push(token.clone());
                    index += 1;
                }
            }
        }

        Ok((parsed, rest))
    }

    fn required_value(arg: &str, lookahead: Option<&str>) -> Result<String> {
        match lookahead {
            Some(value) if !value.is_empty() => Ok(value.to_owned()),
            _ => Err(DevlinkError::invalid_argument(format!(
                "option {arg} requires a value"
            ))),
        }
    }
}
