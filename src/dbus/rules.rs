//! Filter directives in security profiles.
//!
//! A profile is an ordered list of text lines. Bus filter rules look like
//! `dbus-user.talk org.freedesktop.Notifications` or
//! `dbus-system.call org.freedesktop.login1=org.freedesktop.login1.Manager.*@/*`.
//! Each rule becomes one proxy argument (`--talk=org.freedesktop.Notifications`).
//!
//! Policy lines (`dbus-user filter`, `dbus-system none`) are not rules; they
//! are lifted out of the profile by [`Profile::parse`].

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::error::ProfileError;
use super::name::check_name;
use super::policy::{Bus, BusPolicy};

/// Directive kinds understood by the filtering proxy.
pub const DIRECTIVE_KINDS: &[&str] = &["own", "talk", "see", "call", "broadcast"];

/// Parsed security profile: bus policies it requests plus its raw lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Session bus policy requested by the profile, if any.
    pub user_policy: Option<BusPolicy>,
    /// System bus policy requested by the profile, if any.
    pub system_policy: Option<BusPolicy>,
    lines: Vec<String>,
}

impl Profile {
    /// Build a profile from already-parsed lines, kept verbatim.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_policy: None,
            system_policy: None,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse profile text. Blank lines and `#` comments are dropped and
    /// `dbus-user <policy>` / `dbus-system <policy>` lines set the policies.
    pub fn parse(content: &str) -> Result<Self, ProfileError> {
        let mut profile = Profile::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(policy) = policy_line(line, Bus::User)? {
                profile.user_policy = Some(policy);
            } else if let Some(policy) = policy_line(line, Bus::System)? {
                profile.system_policy = Some(policy);
            } else {
                profile.lines.push(line.to_string());
            }
        }

        Ok(profile)
    }

    /// Read and parse a profile file.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let content = fs::read_to_string(path).map_err(|e| ProfileError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let profile = Self::parse(&content)?;
        debug!("Loaded {} profile lines from {:?}", profile.lines.len(), path);
        Ok(profile)
    }

    /// The ordered profile lines.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Read-only rule view over this profile.
    pub fn rules(&self) -> RuleExtractor<'_> {
        RuleExtractor::new(&self.lines)
    }
}

fn policy_line(line: &str, bus: Bus) -> Result<Option<BusPolicy>, ProfileError> {
    let Some(rest) = line.strip_prefix(bus.prefix()) else {
        return Ok(None);
    };
    let Some(value) = rest.strip_prefix(' ') else {
        return Ok(None);
    };
    value
        .parse::<BusPolicy>()
        .map(Some)
        .map_err(|_| ProfileError::UnknownDirective {
            kind: value.trim().to_string(),
            line: line.to_string(),
        })
}

/// Outcome of checking a bus policy against the rules in the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    /// No rules for this bus.
    NoRules,
    /// Rules present and the bus is filtered.
    Filtered,
    /// Rules present but the bus is blocked; the first rule is reported.
    IgnoredUnderBlock {
        /// The first ignored rule line.
        rule: String,
    },
}

/// Scans profile lines for bus filter directives.
///
/// Holds a borrowed view only for the duration of a scan.
#[derive(Debug, Clone, Copy)]
pub struct RuleExtractor<'a> {
    lines: &'a [String],
}

impl<'a> RuleExtractor<'a> {
    /// Create an extractor over an ordered sequence of profile lines.
    pub fn new(lines: &'a [String]) -> Self {
        Self { lines }
    }

    fn rules_for<'p>(
        &self,
        prefix: &'p str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a, 'p> {
        let lines = self.lines;
        lines.iter().filter_map(move |line| {
            let rest = line.strip_prefix(prefix)?.strip_prefix('.')?;
            Some((line.as_str(), rest))
        })
    }

    /// Check that rules for `prefix` agree with the bus policy.
    ///
    /// Rules under `allow` are a configuration error. Rules under `block`
    /// are ignored with a single warning naming the first one.
    pub fn check_consistency(
        &self,
        prefix: &str,
        policy: BusPolicy,
    ) -> Result<Consistency, ProfileError> {
        let Some((line, _)) = self.rules_for(prefix).next() else {
            return Ok(Consistency::NoRules);
        };

        match policy {
            BusPolicy::Allow => Err(ProfileError::RuleWithoutFilter {
                prefix: prefix.to_string(),
            }),
            BusPolicy::Filter => Ok(Consistency::Filtered),
            BusPolicy::Block => {
                warn!("{} filter rule configured, but the bus is blocked", prefix);
                warn!(
                    "Ignoring \"{}\" and any other {} filter rules",
                    line, prefix
                );
                Ok(Consistency::IgnoredUnderBlock {
                    rule: line.to_string(),
                })
            }
        }
    }

    /// Convert the rules for `prefix` into proxy arguments, in profile order.
    ///
    /// `dbus-user.talk org.foo` becomes `--talk=org.foo`. Rules without a
    /// space separator are skipped.
    pub fn collect_arguments(&self, prefix: &str) -> Vec<String> {
        self.rules_for(prefix)
            .filter_map(|(_, rest)| {
                let (name, value) = rest.split_once(' ')?;
                Some(format!("--{}={}", name, value))
            })
            .collect()
    }

    /// Validate every rule for `bus`.
    pub fn validate(&self, bus: Bus) -> Result<usize, ProfileError> {
        let mut count = 0;
        for (line, rest) in self.rules_for(bus.prefix()) {
            validate_directive(line, rest)?;
            count += 1;
        }
        Ok(count)
    }
}

fn validate_directive(line: &str, rest: &str) -> Result<(), ProfileError> {
    let (kind, value) = rest.split_once(' ').unwrap_or((rest, ""));

    if !DIRECTIVE_KINDS.contains(&kind) {
        return Err(ProfileError::UnknownDirective {
            kind: kind.to_string(),
            line: line.to_string(),
        });
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(ProfileError::MissingValue {
            line: line.to_string(),
        });
    }

    let name = match kind {
        "call" | "broadcast" => match value.split_once('=') {
            Some((name, rule)) if !rule.is_empty() => name,
            _ => {
                return Err(ProfileError::MissingRule {
                    line: line.to_string(),
                });
            }
        },
        _ => value,
    };

    if !check_name(name) {
        return Err(ProfileError::InvalidName {
            name: name.to_string(),
            line: line.to_string(),
        });
    }

    Ok(())
}

/// Validate all bus rules in a profile and check them against both policies.
pub fn check_profile(
    profile: &Profile,
    user: BusPolicy,
    system: BusPolicy,
) -> Result<(Consistency, Consistency), ProfileError> {
    let rules = profile.rules();
    rules.validate(Bus::User)?;
    rules.validate(Bus::System)?;
    Ok((
        rules.check_consistency(Bus::User.prefix(), user)?,
        rules.check_consistency(Bus::System.prefix(), system)?,
    ))
}
