use crate::config::{ConfigFormat, FixtureConfig};
use crate::error::Result;
use crate::handlers::generate::FailurePolicy;
use crate::plan::Layout;
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Parser)]
pub struct GlobalCommonArgs {
    #[arg(
        short,
        long,
        global = true,
        help = "working directory holding one directory per CA",
        default_value_os_t = defaults::workdir(),
        value_name = "DIR",
        value_hint = clap::ValueHint::DirPath,
    )]
    pub workdir: PathBuf,
    #[arg(
        short,
        long,
        global = true,
        help = "output directory for keys, certificates and CRLs",
        default_value = "./",
        value_name = "DIR",
        value_hint = clap::ValueHint::DirPath,
    )]
    pub outdir: PathBuf,
    #[arg(
        short,
        long,
        global = true,
        help = "fixture configuration file, built-in fixtures when omitted",
        value_name = "FILE",
        value_hint = clap::ValueHint::FilePath,
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ConfigFormat::Yaml,
        help = "fixture configuration format",
    )]
    pub format: ConfigFormat,
    #[arg(
        long,
        global = true,
        default_value = "openssl",
        help = "openssl executable",
        value_name = "PROGRAM",
        value_hint = clap::ValueHint::CommandName,
    )]
    pub openssl: OsString,
    #[arg(
        long,
        global = true,
        help = "openssl configuration file, the bundled one is written to the working directory when omitted",
        value_name = "FILE",
        value_hint = clap::ValueHint::FilePath,
    )]
    pub openssl_config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_parser = clap::builder::PossibleValuesParser::new(["1024", "2048", "3072", "4096", "8192"])
            .map(|s| s.parse::<usize>().unwrap()),
        help = "RSA key size",
        value_name = "NUMBER",
    )]
    pub key_size: Option<usize>,
    #[arg(
        long,
        global = true,
        value_parser = clap::builder::PossibleValuesParser::new(["sha256", "sha384", "sha512"]),
        help = "signing digest",
        value_name = "STRING",
    )]
    pub digest: Option<String>,
    #[arg(
        long,
        global = true,
        help = "validity of CA and end-entity certificates in days",
        value_name = "NUMBER"
    )]
    pub cert_days: Option<u32>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "more logging, repeat for more",
    )]
    pub verbose: u8,
}

impl GlobalCommonArgs {
    /// The fixture config with command-line overrides applied.
    pub fn fixture_config(&self) -> Result<FixtureConfig> {
        let mut config = match &self.config {
            Some(path) => FixtureConfig::load(path, self.format)?,
            None => FixtureConfig::default(),
        };
        if let Some(key_size) = self.key_size {
            config.settings.key_length = key_size;
        }
        if let Some(digest) = &self.digest {
            config.settings.signing_digest = digest.clone();
        }
        if let Some(cert_days) = self.cert_days {
            config.settings.cert_days = cert_days;
        }
        Ok(config)
    }

    /// The external tool runs from wherever we were started, so every path it
    /// sees is made absolute.
    pub fn layout(&self) -> Result<Layout> {
        Ok(Layout::new(
            std::path::absolute(&self.workdir)?,
            std::path::absolute(&self.outdir)?,
            self.openssl_config
                .as_deref()
                .map(std::path::absolute)
                .transpose()?,
        ))
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "PKIX test fixture generator", long_about = None)]
#[command(next_line_help = true)]
pub struct Cli {
    #[clap(flatten)]
    pub shared: GlobalCommonArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "generate the CA hierarchy, end-entity certificates and CRLs")]
    Generate {
        #[arg(long, help = "continue past failing openssl invocations")]
        keep_going: bool,
    },
    #[command(about = "print the steps generate would take")]
    Plan,
    #[command(about = "print the effective fixture configuration as YAML")]
    Config,
    #[command(about = "print the bundled openssl configuration")]
    OpensslConfig,
}

impl Commands {
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Commands::Generate { keep_going: true } => FailurePolicy::KeepGoing,
            _ => FailurePolicy::Abort,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn workdir() -> PathBuf {
        std::env::temp_dir().join("pkix-test-data")
    }
}
