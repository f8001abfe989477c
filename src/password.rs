//! Per-source passphrases for PKCS#12 archives and JKS keystores.

use std::fmt;
use std::str::FromStr;

use crate::error::ExportError;
use crate::glob::Pattern;

const MASK: &str = "****";

/// A `glob:password` pair. The password is everything after the first
/// colon, so it may itself contain colons or surrounding spaces.
#[derive(Clone)]
pub struct PasswordSpec {
    glob: Pattern,
    password: String,
}

impl PasswordSpec {
    pub fn parse(spec: &str) -> Result<Self, ExportError> {
        let invalid = |reason: String| ExportError::InvalidPasswordSpec {
            spec: match spec.split_once(':') {
                Some((glob, _)) => format!("{}:{}", glob, MASK),
                None => spec.to_string(),
            },
            reason,
        };

        let (glob, password) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected 'glob:password'".to_string()))?;
        let glob = glob.trim();
        if glob.is_empty() {
            return Err(invalid("glob pattern cannot be empty".to_string()));
        }
        let glob = Pattern::recursive(glob).map_err(|e| invalid(e.to_string()))?;

        Ok(PasswordSpec {
            glob,
            password: password.to_string(),
        })
    }

    pub fn glob(&self) -> &Pattern {
        &self.glob
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.glob.matches(identifier)
    }
}

impl FromStr for PasswordSpec {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for PasswordSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.glob.as_str(), MASK)
    }
}

/// Picks the passphrase for a source identifier: the first matching spec
/// wins, otherwise the default.
#[derive(Clone, Default)]
pub struct PasswordResolver {
    specs: Vec<PasswordSpec>,
    default: String,
}

impl PasswordResolver {
    pub fn new(specs: Vec<PasswordSpec>, default: Option<String>) -> Self {
        PasswordResolver {
            specs,
            default: default.unwrap_or_default(),
        }
    }

    pub fn resolve(&self, identifier: &str) -> &str {
        self.specs
            .iter()
            .find(|spec| spec.matches(identifier))
            .map_or(self.default.as_str(), |spec| spec.password.as_str())
    }
}

impl fmt::Debug for PasswordResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResolver")
            .field("specs", &self.specs)
            .field("default", &MASK)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_colons_in_password() {
        let spec = PasswordSpec::parse(" /etc/keystores/*.jks :pa:ss ").unwrap();
        assert_eq!(spec.glob().as_str(), "/etc/keystores/*.jks");
        assert_eq!(spec.password, "pa:ss ");
    }

    #[test]
    fn test_parse_errors_mask_password() {
        let err = PasswordSpec::parse(" :secret").unwrap_err();
        assert!(matches!(err, ExportError::InvalidPasswordSpec { .. }));
        assert!(!err.to_string().contains("secret"));

        assert!(PasswordSpec::parse("no-separator").is_err());
        let err = PasswordSpec::parse("[bad:hunter2").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_first_matching_spec_wins() {
        let resolver = PasswordResolver::new(
            vec![
                PasswordSpec::parse("/certs/special/*.p12:special").unwrap(),
                PasswordSpec::parse("/certs/**/*.p12:generic").unwrap(),
            ],
            Some("fallback".to_string()),
        );
        assert_eq!(resolver.resolve("/certs/special/a.p12"), "special");
        assert_eq!(resolver.resolve("/certs/deep/dir/b.p12"), "generic");
        assert_eq!(resolver.resolve("/certs/c.pem"), "fallback");
    }

    #[test]
    fn test_default_is_empty_when_unset() {
        let resolver = PasswordResolver::new(Vec::new(), None);
        assert_eq!(resolver.resolve("anything"), "");
    }

    #[test]
    fn test_debug_never_prints_passwords() {
        let resolver = PasswordResolver::new(
            vec![PasswordSpec::parse("*.jks:topsecret").unwrap()],
            Some("changeit".to_string()),
        );
        let rendered = format!("{:?}", resolver);
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("changeit"));
        assert!(rendered.contains("*.jks"));
    }
}
