/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_GUEST_QUOTA: u32 = 5;
const DEFAULT_SHORT_ID_LENGTH: usize = 6;
const DEFAULT_SHORT_ID_MAX_ATTEMPTS: u32 = 64;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Length of the human-shareable short id
    pub short_id_length: usize,

    /// Upper bound on collision redraws when minting a short id
    pub short_id_max_attempts: u32,

    /// Total conversation quota (direct + group) for guest accounts whose
    /// record carries no explicit limit
    pub default_guest_quota: u32,

    /// Capacity of the broadcast channel carrying engine events
    pub event_capacity: usize,

    /// Optional data directory for the local document store (in-memory when absent)
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            short_id_length: DEFAULT_SHORT_ID_LENGTH,
            short_id_max_attempts: DEFAULT_SHORT_ID_MAX_ATTEMPTS,
            default_guest_quota: DEFAULT_GUEST_QUOTA,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            data_dir: None,
        }
    }
}

/// Sign-in parameters collected from the command line, handed to the
/// identity-provider stand-in by the demo binary.
#[derive(Debug, Clone)]
pub struct SignInOptions {
    pub display_name: String,
    pub guest: bool,
}

impl Config {
    /// Create config and sign-in options from command line arguments
    pub fn from_args(args: &[String]) -> Result<(Self, SignInOptions)> {
        if args.len() < 2 {
            return Err(ChatError::InvalidInput(format!(
                "Usage: {} <display-name> [--guest] [--data-dir <path>] [--quota <n>]",
                args.first().map(String::as_str).unwrap_or("chatlink")
            )));
        }

        let display_name = args[1].clone();
        if display_name.starts_with("--") || display_name.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "Display name must come before any flags".to_string(),
            ));
        }

        let mut guest = false;
        let mut data_dir: Option<PathBuf> = None;
        let mut quota: Option<u32> = None;

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--guest" => {
                    guest = true;
                    i += 1;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::InvalidInput("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--quota" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::InvalidInput("--quota requires a number argument".to_string())
                    })?;
                    quota = Some(n.parse::<u32>().map_err(|_| {
                        ChatError::InvalidInput("--quota must be a positive number".to_string())
                    })?);
                    i += 2;
                }
                other => {
                    return Err(ChatError::InvalidInput(format!(
                        "Unknown argument: {}",
                        other
                    )));
                }
            }
        }

        // Env override (nice for scripts)
        if let Ok(dir) = std::env::var("CHATLINK_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }

        let config = Self {
            default_guest_quota: quota.unwrap_or(DEFAULT_GUEST_QUOTA),
            data_dir,
            ..Default::default()
        };

        Ok((config, SignInOptions { display_name, guest }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args_defaults() {
        let (config, opts) = Config::from_args(&args(&["chatlink", "alice"])).unwrap();
        assert_eq!(opts.display_name, "alice");
        assert!(!opts.guest);
        assert_eq!(config.default_guest_quota, DEFAULT_GUEST_QUOTA);
        assert_eq!(config.short_id_length, 6);
    }

    #[test]
    fn test_from_args_flags() {
        let (config, opts) = Config::from_args(&args(&[
            "chatlink", "bob", "--guest", "--data-dir", "/tmp/x", "--quota", "3",
        ]))
        .unwrap();
        assert!(opts.guest);
        assert_eq!(config.default_guest_quota, 3);
        assert_eq!(
            config.data_dir.as_deref(),
            Some(std::path::Path::new("/tmp/x"))
        );
    }

    #[test]
    fn test_from_args_rejects_missing_name() {
        assert!(Config::from_args(&args(&["chatlink"])).is_err());
        assert!(Config::from_args(&args(&["chatlink", "--guest"])).is_err());
    }
}
