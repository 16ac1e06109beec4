use crate::config::FixtureConfig;
use crate::error::{Error, Result};
use crate::handlers::generate::utils::{
    copy_file, create_output_directory, init_new_ca_dir, save_to_file,
};
use crate::openssl::{Exit, Runner, Subprocess};
use crate::plan::{Layout, Step, plan};
use std::ffi::OsStr;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// What to do when the external tool exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    /// Log the failure and carry on with the next step.
    KeepGoing,
}

/// Parameters for the generate command.
#[derive(Debug)]
pub struct GenerateParams<'a> {
    pub layout: &'a Layout,
    pub program: &'a OsStr,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub steps: usize,
    /// Commands and copies that failed under [`FailurePolicy::KeepGoing`].
    pub failed: Vec<String>,
}

/// Generate every fixture the config describes.
pub fn handle(params: GenerateParams<'_>, config: &FixtureConfig) -> Result<Summary> {
    let steps = plan(config, params.layout, params.program, OffsetDateTime::now_utc())?;
    create_output_directory(&params.layout.workdir)?;
    create_output_directory(&params.layout.outdir)?;
    info!(
        workdir = %params.layout.workdir.display(),
        outdir = %params.layout.outdir.display(),
        steps = steps.len(),
        "generating fixtures"
    );
    let summary = execute(&steps, &mut Subprocess, params.failure_policy)?;
    if summary.failed.is_empty() {
        info!("all {} steps completed", summary.steps);
    } else {
        warn!("{} of {} steps failed", summary.failed.len(), summary.steps);
    }
    Ok(summary)
}

pub fn execute<R: Runner>(
    steps: &[Step],
    runner: &mut R,
    failure_policy: FailurePolicy,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for step in steps {
        summary.steps += 1;
        match step {
            Step::WriteFile { path, contents } => {
                info!("writing {}", path.display());
                save_to_file(path, contents.as_bytes())?;
            }
            Step::PrepareCaDir(dir) => {
                info!("initializing CA in {}", dir.display());
                init_new_ca_dir(dir)?;
            }
            Step::Copy { from, to } => {
                debug!("copying {} to {}", from.display(), to.display());
                match (copy_file(from, to), failure_policy) {
                    (Ok(()), _) => {}
                    (Err(err), FailurePolicy::Abort) => return Err(err.into()),
                    // The tool step that should have produced `from` failed.
                    (Err(err), FailurePolicy::KeepGoing) => {
                        warn!("`{step}` failed: {err}, continuing");
                        summary.failed.push(step.to_string());
                    }
                }
            }
            Step::Run(invocation) => {
                debug!("running {invocation}");
                match runner.run(invocation)? {
                    Exit::Success => {}
                    failure => match failure_policy {
                        FailurePolicy::Abort => {
                            return Err(Error::ToolFailed {
                                command: invocation.to_string(),
                                status: failure.to_string(),
                            });
                        }
                        FailurePolicy::KeepGoing => {
                            warn!("`{invocation}` failed with {failure}, continuing");
                            summary.failed.push(invocation.to_string());
                        }
                    },
                }
            }
        }
    }
    Ok(summary)
}

mod utils {
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    pub(crate) fn create_output_directory(path: &Path) -> std::io::Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    pub(crate) fn save_to_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?
            .write_all(data)
    }

    /// Anything left over from a previous run is removed.
    pub(crate) fn init_new_ca_dir(root: &Path) -> std::io::Result<()> {
        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::create_dir_all(root.join("newcerts"))?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(root.join("index.txt"))?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(root.join("serial"))?
            .write_all(b"01\n")
    }

    pub(crate) fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openssl::{Commands, Invocation};
    use assert_fs::prelude::*;
    use std::path::Path;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    /// Stands in for `openssl`: records invocations and fails the ones whose
    /// command matches `fail_on`.
    #[derive(Default)]
    struct Recorder {
        ran: Vec<Invocation>,
        fail_on: Option<&'static str>,
    }

    impl Runner for Recorder {
        fn run(&mut self, invocation: &Invocation) -> Result<Exit> {
            self.ran.push(invocation.clone());
            if self.fail_on == Some(invocation.command) {
                Ok(Exit::Failure(Some(1)))
            } else {
                Ok(Exit::Success)
            }
        }
    }

    fn commands() -> Commands<'static> {
        Commands {
            program: OsStr::new("openssl"),
            config: Path::new("openssl.cnf"),
            digest: "sha256",
        }
    }

    #[test]
    fn prepares_fresh_ca_directory() -> TestResult {
        let temp = assert_fs::TempDir::new()?;
        let ca = temp.child("root1-ca");
        ca.create_dir_all()?;
        ca.child("stale.crt").touch()?;

        execute(
            &[Step::PrepareCaDir(ca.to_path_buf())],
            &mut Recorder::default(),
            FailurePolicy::Abort,
        )?;

        ca.child("stale.crt").assert(predicates::path::missing());
        ca.child("newcerts").assert(predicates::path::is_dir());
        ca.child("index.txt").assert("");
        ca.child("serial").assert("01\n");
        Ok(())
    }

    #[test]
    fn writes_copies_and_runs_in_order() -> TestResult {
        let temp = assert_fs::TempDir::new()?;
        let key = temp.child("ca.key");
        key.write_str("KEY")?;
        let out = temp.child("out.key");
        let cnf = temp.child("openssl.cnf");

        let mut recorder = Recorder::default();
        let steps = [
            Step::WriteFile {
                path: cnf.to_path_buf(),
                contents: "[ ca ]\n",
            },
            Step::Run(commands().gen_key(key.path(), 2048)),
            Step::Copy {
                from: key.to_path_buf(),
                to: out.to_path_buf(),
            },
        ];
        let summary = execute(&steps, &mut recorder, FailurePolicy::Abort)?;

        assert_eq!(summary.steps, 3);
        assert!(summary.failed.is_empty());
        assert_eq!(recorder.ran.len(), 1);
        assert_eq!(recorder.ran[0].command, "genrsa");
        cnf.assert("[ ca ]\n");
        out.assert("KEY");
        Ok(())
    }

    #[test]
    fn abort_stops_at_first_failure() {
        let mut recorder = Recorder {
            fail_on: Some("ca"),
            ..Default::default()
        };
        let c = commands();
        let steps = [
            Step::Run(c.revoke_cert(Path::new("/w/ca"), Path::new("/o/x.crt"))),
            Step::Run(c.gen_key(Path::new("/o/y.key"), 2048)),
        ];
        let err = execute(&steps, &mut recorder, FailurePolicy::Abort).unwrap_err();
        assert!(matches!(
            err,
            Error::ToolFailed { ref status, .. } if status == "exit code 1"
        ));
        assert_eq!(recorder.ran.len(), 1);
    }

    #[test]
    fn keep_going_records_failures() {
        let mut recorder = Recorder {
            fail_on: Some("ca"),
            ..Default::default()
        };
        let c = commands();
        let steps = [
            Step::Run(c.revoke_cert(Path::new("/w/ca"), Path::new("/o/x.crt"))),
            Step::Run(c.gen_key(Path::new("/o/y.key"), 2048)),
        ];
        let summary = execute(&steps, &mut recorder, FailurePolicy::KeepGoing).unwrap();
        assert_eq!(recorder.ran.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].contains("-revoke /o/x.crt"));
    }

    #[test]
    fn keep_going_survives_missing_ca_files() -> TestResult {
        let temp = assert_fs::TempDir::new()?;
        let layout = Layout::new(
            temp.child("work").to_path_buf(),
            temp.child("out").to_path_buf(),
            None,
        );
        let steps = plan(
            &FixtureConfig::default(),
            &layout,
            OsStr::new("openssl"),
            OffsetDateTime::now_utc(),
        )?;
        create_output_directory(&layout.workdir)?;
        create_output_directory(&layout.outdir)?;

        // Every `req` fails and the recorder writes no files, so every copy
        // of a CA key or certificate fails as well.
        let mut recorder = Recorder {
            fail_on: Some("req"),
            ..Default::default()
        };
        let summary = execute(&steps, &mut recorder, FailurePolicy::KeepGoing)?;

        assert_eq!(summary.steps, steps.len());
        // 4 roots * 2 + 8 subordinate CAs * 3 + 6 end entities * 3 + 5 CRL steps
        assert_eq!(recorder.ran.len(), 55);
        assert_eq!(recorder.ran.last().map(|inv| inv.command), Some("ca"));
        let copies = summary.failed.iter().filter(|f| f.starts_with("cp ")).count();
        assert_eq!(copies, 24);
        // 4 root self-signs + 8 CA requests + 6 end-entity requests
        assert_eq!(summary.failed.len() - copies, 18);
        temp.child("work/mdt-ica.3/serial").assert("01\n");
        Ok(())
    }

    #[test]
    fn abort_stops_at_missing_copy_source() -> TestResult {
        let temp = assert_fs::TempDir::new()?;
        let steps = [Step::Copy {
            from: temp.child("missing.crt").to_path_buf(),
            to: temp.child("out.crt").to_path_buf(),
        }];
        let err = execute(&steps, &mut Recorder::default(), FailurePolicy::Abort).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        Ok(())
    }

    #[test]
    fn full_default_plan_against_recorder() -> TestResult {
        let temp = assert_fs::TempDir::new()?;
        let layout = Layout::new(
            temp.child("work").to_path_buf(),
            temp.child("out").to_path_buf(),
            None,
        );
        let steps = plan(
            &FixtureConfig::default(),
            &layout,
            OsStr::new("openssl"),
            OffsetDateTime::now_utc(),
        )?;
        create_output_directory(&layout.workdir)?;
        create_output_directory(&layout.outdir)?;

        // Nothing produces key or certificate files here, so stop short of the
        // first copy.
        let first_copy = steps
            .iter()
            .position(|s| matches!(s, Step::Copy { .. }))
            .unwrap();
        let mut recorder = Recorder::default();
        execute(&steps[..first_copy], &mut recorder, FailurePolicy::Abort)?;

        temp.child("work/openssl.cnf")
            .assert(predicates::str::contains("[ altname_req ]"));
        temp.child("work/root1-ca/serial").assert("01\n");
        assert_eq!(recorder.ran.len(), 2);
        Ok(())
    }
}
