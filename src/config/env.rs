//! Environment-variable configuration.
//!
//! Every loader takes a lookup closure so tests can feed a map instead of
//! mutating the process environment. Empty values count as unset.

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::types::{HostKeyPolicy, ManagerConfig};
use crate::connection::Credentials;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_CONNECT_TIMEOUT: &str = "SFTP_CONNECT_TIMEOUT_SECS";
pub const ENV_IO_TIMEOUT: &str = "SFTP_IO_TIMEOUT_SECS";
pub const ENV_BULK_CONNECT_TIMEOUT: &str = "SFTP_BULK_CONNECT_TIMEOUT_SECS";
pub const ENV_BULK_PARALLELISM: &str = "SFTP_BULK_PARALLELISM";
pub const ENV_KNOWN_HOSTS: &str = "SFTP_KNOWN_HOSTS";
pub const ENV_KEEPALIVE: &str = "SFTP_KEEPALIVE_SECS";
pub const ENV_BUFFER_SIZE: &str = "SFTP_BUFFER_SIZE";
pub const ENV_LOCAL_ROOT: &str = "SFTP_LOCAL_ROOT";

pub const ENV_HOST: &str = "SFTP_HOST";
pub const ENV_PORT: &str = "SFTP_PORT";
pub const ENV_USER: &str = "SFTP_USER";
pub const ENV_PEMFILE: &str = "SFTP_PEMFILE";
pub const ENV_PASSPHRASE: &str = "SFTP_PASSPHRASE";
pub const ENV_PASSWORD: &str = "SFTP_PASSWORD";
pub const ENV_LOCAL_DIR: &str = "LOCAL_DIR";
pub const ENV_FILENAME: &str = "FILENAME";
pub const ENV_REMOTE_DIR: &str = "REMOTE_DIR";
pub const ENV_VUS: &str = "SFTP_VUS";

/// Value of `SFTP_KNOWN_HOSTS` that disables host key verification.
pub const ACCEPT_ANY_HOST_KEY: &str = "accept-any";

impl ManagerConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_CONNECT_TIMEOUT)? {
            config.connect.connect_timeout = positive_secs(ENV_CONNECT_TIMEOUT, secs)?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_IO_TIMEOUT)? {
            config.connect.io_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_BULK_CONNECT_TIMEOUT)? {
            config.bulk_connect_timeout = positive_secs(ENV_BULK_CONNECT_TIMEOUT, secs)?;
        }
        if let Some(parallelism) = parse_var::<usize, _>(&lookup, ENV_BULK_PARALLELISM)? {
            if parallelism == 0 {
                return Err(invalid(ENV_BULK_PARALLELISM, "0", "must be at least 1"));
            }
            config.bulk_connect_parallelism = parallelism;
        }
        if let Some(value) = read_var(&lookup, ENV_KNOWN_HOSTS) {
            config.connect.host_key = if value.eq_ignore_ascii_case(ACCEPT_ANY_HOST_KEY) {
                HostKeyPolicy::AcceptAny
            } else {
                HostKeyPolicy::KnownHosts(PathBuf::from(value))
            };
        }
        if let Some(secs) = parse_var::<u32, _>(&lookup, ENV_KEEPALIVE)? {
            config.connect.keepalive_interval_secs = secs;
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, ENV_BUFFER_SIZE)? {
            if size == 0 {
                return Err(invalid(ENV_BUFFER_SIZE, "0", "must be at least 1"));
            }
            config.transfer.buffer_size = size;
        }
        if let Some(root) = read_var(&lookup, ENV_LOCAL_ROOT) {
            config.transfer.local_root = Some(PathBuf::from(root));
        }

        Ok(config)
    }
}

/// Connection and file parameters of a load-test scenario, read from the
/// same variables the test scripts pass around.
#[derive(Debug, Clone)]
pub struct ScenarioEnv {
    pub host: String,
    pub port: String,
    pub user: String,
    pub credentials: Credentials,
    pub local_dir: PathBuf,
    pub filename: String,
    pub remote_dir: String,
    pub vus: usize,
}

impl ScenarioEnv {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = match (
            read_var(&lookup, ENV_PEMFILE),
            read_var(&lookup, ENV_PASSWORD),
        ) {
            (Some(pem), _) => Credentials::key(pem, read_var(&lookup, ENV_PASSPHRASE)),
            (None, Some(password)) => Credentials::password(password),
            (None, None) => {
                return Err(ConfigError::Missing(format!(
                    "{ENV_PEMFILE} or {ENV_PASSWORD}"
                )))
            }
        };

        let vus = parse_var::<usize, _>(&lookup, ENV_VUS)?.unwrap_or(1);

        Ok(Self {
            host: require_var(&lookup, ENV_HOST)?,
            port: read_var(&lookup, ENV_PORT).unwrap_or_else(|| "22".to_string()),
            user: require_var(&lookup, ENV_USER)?,
            credentials,
            local_dir: PathBuf::from(require_var(&lookup, ENV_LOCAL_DIR)?),
            filename: require_var(&lookup, ENV_FILENAME)?,
            remote_dir: require_var(&lookup, ENV_REMOTE_DIR)?,
            vus,
        })
    }
}

fn read_var<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_var<F>(lookup: &F, var: &str) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    read_var(lookup, var).ok_or_else(|| ConfigError::Missing(var.to_string()))
}

fn parse_var<T, F>(lookup: &F, var: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match read_var(lookup, var) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, &value, e)),
        None => Ok(None),
    }
}

fn positive_secs(var: &str, secs: u64) -> ConfigResult<Duration> {
    if secs == 0 {
        return Err(invalid(var, "0", "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

fn invalid(var: &str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_keeps_defaults() {
        let config = ManagerConfig::from_lookup(lookup_from(&[])).unwrap();
        let defaults = ManagerConfig::default();
        assert_eq!(config.connect.connect_timeout, defaults.connect.connect_timeout);
        assert_eq!(config.bulk_connect_timeout, defaults.bulk_connect_timeout);
        assert_eq!(config.connect.host_key, defaults.connect.host_key);
    }

    #[test]
    fn test_overrides() {
        let config = ManagerConfig::from_lookup(lookup_from(&[
            (ENV_CONNECT_TIMEOUT, "5"),
            (ENV_IO_TIMEOUT, "0"),
            (ENV_BULK_CONNECT_TIMEOUT, "120"),
            (ENV_BULK_PARALLELISM, "4"),
            (ENV_KNOWN_HOSTS, "accept-any"),
            (ENV_BUFFER_SIZE, "65536"),
            (ENV_LOCAL_ROOT, "/srv/loadtest"),
        ]))
        .unwrap();

        assert_eq!(config.connect.connect_timeout, Duration::from_secs(5));
        assert!(config.connect.io_timeout.is_none());
        assert_eq!(config.bulk_connect_timeout, Duration::from_secs(120));
        assert_eq!(config.bulk_connect_parallelism, 4);
        assert_eq!(config.connect.host_key, HostKeyPolicy::AcceptAny);
        assert_eq!(config.transfer.buffer_size, 65536);
        assert_eq!(
            config.transfer.local_root,
            Some(PathBuf::from("/srv/loadtest"))
        );
    }

    #[test]
    fn test_known_hosts_path() {
        let config =
            ManagerConfig::from_lookup(lookup_from(&[(ENV_KNOWN_HOSTS, "/etc/ssh/known")]))
                .unwrap();
        assert_eq!(
            config.connect.host_key,
            HostKeyPolicy::KnownHosts(PathBuf::from("/etc/ssh/known"))
        );
    }

    #[test]
    fn test_malformed_values_rejected() {
        let result = ManagerConfig::from_lookup(lookup_from(&[(ENV_CONNECT_TIMEOUT, "soon")]));
        assert!(matches!(result, Err(ConfigError::Invalid { ref var, .. }) if var == ENV_CONNECT_TIMEOUT));

        let result = ManagerConfig::from_lookup(lookup_from(&[(ENV_BUFFER_SIZE, "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = ManagerConfig::from_lookup(lookup_from(&[(ENV_CONNECT_TIMEOUT, "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_scenario_with_key() {
        let scenario = ScenarioEnv::from_lookup(lookup_from(&[
            (ENV_HOST, "sftp.internal"),
            (ENV_USER, "loadtest"),
            (ENV_PEMFILE, "keys/id_rsa.pem"),
            (ENV_PASSPHRASE, "hunter2"),
            (ENV_LOCAL_DIR, "./testdata/"),
            (ENV_FILENAME, "fileToUpload"),
            (ENV_REMOTE_DIR, "remoteUploadDir"),
            (ENV_VUS, "3"),
        ]))
        .unwrap();

        assert_eq!(scenario.port, "22");
        assert_eq!(scenario.vus, 3);
        assert!(matches!(scenario.credentials, Credentials::Key { .. }));
        assert!(!format!("{:?}", scenario).contains("hunter2"));
    }

    #[test]
    fn test_scenario_requires_credentials() {
        let result = ScenarioEnv::from_lookup(lookup_from(&[
            (ENV_HOST, "sftp.internal"),
            (ENV_USER, "loadtest"),
            (ENV_LOCAL_DIR, "."),
            (ENV_FILENAME, "f"),
            (ENV_REMOTE_DIR, "r"),
        ]));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_scenario_missing_host() {
        let result = ScenarioEnv::from_lookup(lookup_from(&[
            (ENV_PASSWORD, "pw"),
            (ENV_HOST, "   "),
        ]));
        assert!(matches!(result, Err(ConfigError::Missing(ref var)) if var == ENV_HOST));
    }
}
