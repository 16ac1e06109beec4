//! Turns a [`FixtureConfig`] into the ordered steps that produce it.
//!
//! Planning never touches the filesystem, so `plan` output and tests see the
//! exact same sequence `generate` executes.

use crate::assets::{BUNDLED_OPENSSL_CONFIG, OPENSSL_CONFIG_NAME};
use crate::config::{CaNode, CrlStep, EndEntity, FixtureConfig, Validity};
use crate::error::{Error, Result};
use crate::openssl::{Commands, Invocation, SignValidity};
use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Where things go on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Holds one directory per CA plus the end-entity requests.
    pub workdir: PathBuf,
    /// Receives keys, certificates and CRLs.
    pub outdir: PathBuf,
    pub openssl_config: PathBuf,
    /// Write [`BUNDLED_OPENSSL_CONFIG`] to `openssl_config` first.
    pub bundled_config: bool,
}

impl Layout {
    pub fn new(workdir: PathBuf, outdir: PathBuf, openssl_config: Option<PathBuf>) -> Self {
        match openssl_config {
            Some(openssl_config) => Layout {
                workdir,
                outdir,
                openssl_config,
                bundled_config: false,
            },
            None => Layout {
                openssl_config: workdir.join(OPENSSL_CONFIG_NAME),
                workdir,
                outdir,
                bundled_config: true,
            },
        }
    }

    pub fn ca_dir(&self, ca: &str) -> PathBuf {
        self.workdir.join(ca)
    }

    pub fn output(&self, name: &str, extension: &str) -> PathBuf {
        self.outdir.join(format!("{name}.{extension}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    WriteFile {
        path: PathBuf,
        contents: &'static str,
    },
    /// Fresh CA directory: `newcerts/`, empty `index.txt`, `serial` of `01`.
    PrepareCaDir(PathBuf),
    Run(Invocation),
    Copy {
        from: PathBuf,
        to: PathBuf,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::WriteFile { path, .. } => write!(f, "# write {}", path.display()),
            Step::PrepareCaDir(dir) => write!(f, "# init CA directory {}", dir.display()),
            Step::Run(invocation) => invocation.fmt(f),
            Step::Copy { from, to } => write!(f, "cp {} {}", from.display(), to.display()),
        }
    }
}

pub fn plan(
    config: &FixtureConfig,
    layout: &Layout,
    program: &OsStr,
    now: OffsetDateTime,
) -> Result<Vec<Step>> {
    config.validate()?;
    let planner = Planner {
        config,
        layout,
        commands: Commands {
            program,
            config: &layout.openssl_config,
            digest: &config.settings.signing_digest,
        },
        now,
    };

    let mut steps = Vec::new();
    if layout.bundled_config {
        steps.push(Step::WriteFile {
            path: layout.openssl_config.clone(),
            contents: BUNDLED_OPENSSL_CONFIG,
        });
    }
    for root in &config.authorities {
        planner.init_ca(root, None, &mut steps)?;
    }
    for ee in &config.end_entities {
        planner.issue(ee, &mut steps)?;
    }
    for crl in &config.crls {
        planner.crl(crl, &mut steps);
    }
    Ok(steps)
}

struct Planner<'a> {
    config: &'a FixtureConfig,
    layout: &'a Layout,
    commands: Commands<'a>,
    now: OffsetDateTime,
}

impl Planner<'_> {
    fn init_ca(&self, ca: &CaNode, parent: Option<&str>, steps: &mut Vec<Step>) -> Result<()> {
        let settings = &self.config.settings;
        let dir = self.layout.ca_dir(&ca.name);
        let key = dir.join("ca.key");
        let csr = dir.join("ca.csr");
        let cert = dir.join("ca.crt");
        let subject = format!("/{}", ca.subject_or_default());

        steps.push(Step::PrepareCaDir(dir));
        steps.push(Step::Run(self.commands.gen_key(&key, settings.key_length)));
        match parent {
            Some(parent) => {
                steps.push(Step::Run(self.commands.gen_csr(
                    &key,
                    &csr,
                    &subject,
                    ca.exts.as_deref(),
                    None,
                    &[],
                )));
                steps.push(Step::Run(self.commands.sign_csr(
                    &csr,
                    &cert,
                    &self.layout.ca_dir(parent),
                    &settings.ca_exts,
                    SignValidity::Days(settings.cert_days),
                )?));
            }
            None => steps.push(Step::Run(self.commands.self_sign(
                &key,
                &cert,
                settings.cert_days,
                &subject,
                &settings.ca_exts,
            ))),
        }
        steps.push(Step::Copy {
            from: key,
            to: self.layout.output(&ca.name, "key"),
        });
        steps.push(Step::Copy {
            from: cert,
            to: self.layout.output(&ca.name, "crt"),
        });

        for sub in &ca.subs {
            self.init_ca(sub, Some(&ca.name), steps)?;
        }
        Ok(())
    }

    fn issue(&self, ee: &EndEntity, steps: &mut Vec<Step>) -> Result<()> {
        let settings = &self.config.settings;
        let key = self.layout.output(&ee.name, "key");
        let csr = self.layout.workdir.join(format!("{}.csr", ee.name));
        let cert = self.layout.output(&ee.name, "crt");
        let validity = match ee.validity(settings) {
            Validity::Days(days) => SignValidity::Days(days),
            Validity::Window(lifetime) => {
                let end = time::Duration::try_from(lifetime)
                    .ok()
                    .and_then(|lifetime| self.now.checked_add(lifetime))
                    .ok_or_else(|| Error::ValidityOverflow(ee.name.clone()))?;
                SignValidity::Between {
                    start: self.now,
                    end,
                }
            }
        };
        let san = ee.alt_names();

        steps.push(Step::Run(self.commands.gen_key(&key, settings.key_length)));
        steps.push(Step::Run(self.commands.gen_csr(
            &key,
            &csr,
            &format!("/{}", ee.subject),
            ee.exts.as_deref(),
            san.as_deref(),
            &ee.addext,
        )));
        steps.push(Step::Run(self.commands.sign_csr(
            &csr,
            &cert,
            &self.layout.ca_dir(&ee.signer),
            &settings.end_entity_exts,
            validity,
        )?));
        Ok(())
    }

    fn crl(&self, step: &CrlStep, steps: &mut Vec<Step>) {
        let cahome = self.layout.ca_dir(step.ca());
        let invocation = match step {
            CrlStep::Gen { out, exts, .. } => {
                let validity = step.validity(&self.config.settings);
                self.commands.gen_crl(
                    &cahome,
                    &self.layout.outdir.join(out),
                    validity.days,
                    validity.hours,
                    exts.as_deref(),
                )
            }
            CrlStep::Revoke { cert, .. } => self
                .commands
                .revoke_cert(&cahome, &self.layout.output(cert, "crt")),
        };
        steps.push(Step::Run(invocation));
    }
}
