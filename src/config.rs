//! Discovery of node RPC credentials: a `bitcoin.conf`-style file first,
//! environment variables as a fallback. Grounded on the teacher's
//! `fetch_settings`/`ClientConfig` (src/lib.rs), generalized to the
//! key=value grammar a real `bitcoin.conf` uses instead of a generic
//! `config`-crate format.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bitcoincore_rpc::Auth;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{OracleError, Result};

const RECOGNIZED_OPTIONS: &[&str] = &[
    "datadir",
    "rpcuser",
    "rpcpassword",
    "rpccookiefile",
    "rpcconnect",
    "rpcport",
    "conf",
];

/// RPC password, zeroized on drop so a credential never lingers in memory
/// past the lifetime of the `ClientConfig` that owns it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RpcPassword(String);

impl RpcPassword {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RpcPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RpcPassword(<redacted>)")
    }
}

/// Configuration required for connecting to bitcoind via RPC.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub username: String,
    pub password: RpcPassword,
    pub cookie_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Build the `bitcoincore_rpc::Auth` implied by this configuration.
    /// A cookie file, when present, takes precedence over user/pass.
    pub fn auth(&self) -> Auth {
        match &self.cookie_file {
            Some(path) => Auth::CookieFile(path.clone()),
            None => Auth::UserPass(self.username.clone(), self.password.expose().to_string()),
        }
    }
}

/// Default location of bitcoind's config file.
pub fn default_config_path() -> PathBuf {
    dirs_home().join(".bitcoin/bitcoin.conf")
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Parse a `bitcoin.conf` style file: `key=value` lines, `#` comments
/// (full-line or inline), blank lines ignored, keys lowercased.
///
/// Matches the grammar `^\s*([^#\s=]+)\s*=\s*([^#]+)\s*$`.
fn parse_conf_contents(contents: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            continue;
        }

        let rest = &line[eq_pos + 1..];
        let value = rest.split('#').next().unwrap_or("").trim();

        out.insert(key.to_lowercase(), value.to_string());
    }

    out
}

fn read_conf_file(path: &Path) -> Result<HashMap<String, String>> {
    let contents = fs::read_to_string(path).map_err(|err| {
        OracleError::Config(format!(
            "could not read config file {}: {err}",
            path.display()
        ))
    })?;

    let mut options: HashMap<String, String> = parse_conf_contents(&contents);
    options.retain(|key, _| RECOGNIZED_OPTIONS.contains(&key.as_str()));
    Ok(options)
}

fn env_options() -> HashMap<String, String> {
    let mut out = HashMap::new();
    for key in RECOGNIZED_OPTIONS {
        if let Ok(value) = env::var(key) {
            out.insert(key.to_string(), value);
        }
    }
    out
}

/// Load the RPC client configuration, trying `config_path` first and
/// falling back to environment variables when no file exists.
pub fn load_client_config(config_path: &Path) -> Result<ClientConfig> {
    let options = if config_path.exists() {
        read_conf_file(config_path)?
    } else {
        tracing::info!("no config file at {}, checking environment", config_path.display());
        let env = env_options();

        let missing: Vec<&str> = ["datadir", "rpcuser", "rpcpassword"]
            .into_iter()
            .filter(|key| !env.contains_key(*key))
            .collect();

        if !missing.is_empty() {
            return Err(OracleError::Config(
                "credentials not found; set rpcuser/rpcpassword/datadir or point --config at a bitcoin.conf".to_string(),
            ));
        }

        env
    };

    let host = match (options.get("rpcconnect"), options.get("rpcport")) {
        (Some(connect), Some(port)) => format!("http://{connect}:{port}"),
        (Some(connect), None) => format!("http://{connect}:8332"),
        (None, Some(port)) => format!("http://127.0.0.1:{port}"),
        (None, None) => "http://127.0.0.1:8332".to_string(),
    };

    let cookie_file = options.get("rpccookiefile").map(PathBuf::from);

    let username = options.get("rpcuser").cloned().unwrap_or_default();
    let password = RpcPassword(options.get("rpcpassword").cloned().unwrap_or_default());

    if cookie_file.is_none() && (username.is_empty() || password.expose().is_empty()) {
        return Err(OracleError::Config(
            "no rpccookiefile and no rpcuser/rpcpassword available".to_string(),
        ));
    }

    Ok(ClientConfig {
        host,
        username,
        password,
        cookie_file,
    })
}
