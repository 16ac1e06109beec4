//! Builds and runs `openssl` invocations.
//!
//! Parameters are kept in insertion order. A parameter without a value is a
//! bare flag, a list value repeats the flag once per element.

use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use time::OffsetDateTime;
use time::macros::format_description;

/// Environment variable the configuration file reads the CA directory from.
pub const CAHOME: &str = "CAHOME";
/// Environment variable the alt-name request section reads from.
pub const SAN: &str = "SAN";

/// OpenSSL expands `$ENV::` references while loading the configuration, so
/// both variables need a value on every invocation, even the ones that do
/// not use them.
const ENV_FALLBACKS: [(&str, &str); 2] = [(CAHOME, "."), (SAN, "DNS:localhost")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Flag,
    Value(OsString),
    List(Vec<OsString>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.0.push((name.into(), ParamValue::Flag));
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.0
            .push((name.into(), ParamValue::Value(value.as_ref().to_owned())));
        self
    }

    pub fn list<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let values = values.into_iter().map(|v| v.as_ref().to_owned()).collect();
        self.0.push((name.into(), ParamValue::List(values)));
        self
    }

    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        for (name, value) in &self.0 {
            match value {
                ParamValue::Flag => args.push(OsString::from(name)),
                ParamValue::Value(value) => {
                    args.push(OsString::from(name));
                    args.push(value.clone());
                }
                ParamValue::List(values) => {
                    for value in values {
                        args.push(OsString::from(name));
                        args.push(value.clone());
                    }
                }
            }
        }
        args
    }
}

/// One run of the external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub command: &'static str,
    pub config: Option<PathBuf>,
    pub params: Params,
    pub env: Vec<(&'static str, OsString)>,
}

impl Invocation {
    /// Arguments after the program name.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(self.command)];
        if let Some(config) = &self.config {
            args.push("-config".into());
            args.push(config.as_os_str().to_owned());
        }
        args.extend(self.params.to_args());
        args
    }

    pub fn env_var(&self, name: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_os_str())
    }

    fn with_env(mut self, name: &'static str, value: impl AsRef<OsStr>) -> Self {
        self.env.push((name, value.as_ref().to_owned()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.env {
            write!(f, "{name}={} ", quote(value))?;
        }
        write!(f, "{}", quote(&self.program))?;
        for arg in self.args() {
            write!(f, " {}", quote(&arg))?;
        }
        Ok(())
    }
}

fn quote(value: &OsStr) -> String {
    let value = value.to_string_lossy();
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        value.into_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// `-startdate`/`-enddate` stamp in UTC. `YYMMDDHHMMSSZ` only covers
/// 1950-2049, anything outside gets the four-digit `YYYYMMDDHHMMSSZ` form.
pub fn stamp(at: OffsetDateTime) -> Result<String> {
    let at = at.to_offset(time::UtcOffset::UTC);
    let stamp = if (1950..2050).contains(&at.year()) {
        at.format(format_description!(
            "[year repr:last_two][month][day][hour][minute][second]Z"
        ))?
    } else {
        at.format(format_description!("[year][month][day][hour][minute][second]Z"))?
    };
    Ok(stamp)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignValidity {
    Days(u32),
    Between {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

/// Shared inputs of every invocation.
#[derive(Debug, Clone)]
pub struct Commands<'a> {
    pub program: &'a OsStr,
    pub config: &'a Path,
    pub digest: &'a str,
}

impl Commands<'_> {
    fn invocation(&self, command: &'static str, params: Params) -> Invocation {
        Invocation {
            program: self.program.to_owned(),
            command,
            config: Some(self.config.to_owned()),
            params,
            env: Vec::new(),
        }
    }

    /// The key length has to come last.
    pub fn gen_key(&self, path: &Path, length: usize) -> Invocation {
        let params = Params::new().value("-out", path).flag(length.to_string());
        Invocation {
            config: None,
            ..self.invocation("genrsa", params)
        }
    }

    pub fn gen_csr(
        &self,
        key: &Path,
        csr: &Path,
        subject: &str,
        exts: Option<&str>,
        san: Option<&str>,
        addext: &[String],
    ) -> Invocation {
        let mut params = Params::new()
            .flag("-new")
            .value("-key", key)
            .value("-out", csr)
            .value("-subj", subject)
            .flag(format!("-{}", self.digest));
        if let Some(exts) = exts {
            params = params.value("-reqexts", exts);
        }
        if !addext.is_empty() {
            params = params.list("-addext", addext);
        }
        let invocation = self.invocation("req", params);
        match san {
            Some(san) => invocation.with_env(SAN, san),
            None => invocation,
        }
    }

    /// Root certificates are self-signed straight from the key.
    pub fn self_sign(
        &self,
        key: &Path,
        cert: &Path,
        days: u32,
        subject: &str,
        exts: &str,
    ) -> Invocation {
        let params = Params::new()
            .flag("-new")
            .flag("-x509")
            .value("-key", key)
            .value("-out", cert)
            .value("-days", days.to_string())
            .value("-subj", subject)
            .flag(format!("-{}", self.digest))
            .value("-extensions", exts);
        self.invocation("req", params)
    }

    /// `-batch` keeps `openssl ca` from prompting for confirmation.
    pub fn sign_csr(
        &self,
        csr: &Path,
        cert: &Path,
        cahome: &Path,
        exts: &str,
        validity: SignValidity,
    ) -> Result<Invocation> {
        let mut params = Params::new()
            .flag("-batch")
            .value("-in", csr)
            .value("-out", cert)
            .value("-md", self.digest)
            .value("-extensions", exts);
        params = match validity {
            SignValidity::Days(days) => params.value("-days", days.to_string()),
            SignValidity::Between { start, end } => params
                .value("-startdate", stamp(start)?)
                .value("-enddate", stamp(end)?),
        };
        Ok(self.invocation("ca", params).with_env(CAHOME, cahome))
    }

    /// `-gencrl` must be the first parameter.
    pub fn gen_crl(
        &self,
        cahome: &Path,
        out: &Path,
        days: Option<u32>,
        hours: Option<u32>,
        exts: Option<&str>,
    ) -> Invocation {
        let mut params = Params::new()
            .flag("-gencrl")
            .value("-out", out)
            .value("-md", self.digest);
        if let Some(days) = days {
            params = params.value("-crldays", days.to_string());
        }
        if let Some(hours) = hours {
            params = params.value("-crlhours", hours.to_string());
        }
        if let Some(exts) = exts {
            params = params.value("-crlexts", exts);
        }
        self.invocation("ca", params).with_env(CAHOME, cahome)
    }

    pub fn revoke_cert(&self, cahome: &Path, cert: &Path) -> Invocation {
        let params = Params::new().value("-revoke", cert);
        self.invocation("ca", params).with_env(CAHOME, cahome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// Exit code, `None` when killed by a signal.
    Failure(Option<i32>),
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Success => write!(f, "success"),
            Exit::Failure(Some(code)) => write!(f, "exit code {code}"),
            Exit::Failure(None) => write!(f, "signal"),
        }
    }
}

pub trait Runner {
    fn run(&mut self, invocation: &Invocation) -> Result<Exit>;
}

/// Runs invocations as child processes sharing this process's stdio.
#[derive(Debug, Default)]
pub struct Subprocess;

impl Runner for Subprocess {
    fn run(&mut self, invocation: &Invocation) -> Result<Exit> {
        let mut command = Command::new(&invocation.program);
        command.args(invocation.args());
        for (name, value) in ENV_FALLBACKS {
            if invocation.env_var(name).is_none() {
                command.env(name, value);
            }
        }
        command.envs(invocation.env.iter().map(|(k, v)| (*k, v)));
        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());

        let status = command.status().map_err(|source| Error::Spawn {
            program: invocation.program.to_string_lossy().into_owned(),
            source,
        })?;
        if status.success() {
            Ok(Exit::Success)
        } else {
            Ok(Exit::Failure(status.code()))
        }
    }
}
