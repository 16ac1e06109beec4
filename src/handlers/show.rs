//! Read-only commands: nothing here touches the filesystem or runs the tool.

use crate::config::FixtureConfig;
use crate::error::Result;
use crate::assets::BUNDLED_OPENSSL_CONFIG;
use crate::plan::{Layout, plan};
use std::ffi::OsStr;
use std::io::Write;
use time::OffsetDateTime;

/// Print every step `generate` would take, one per line.
pub fn print_plan<W: Write>(
    out: &mut W,
    config: &FixtureConfig,
    layout: &Layout,
    program: &OsStr,
) -> Result<()> {
    for step in plan(config, layout, program, OffsetDateTime::now_utc())? {
        writeln!(out, "{step}")?;
    }
    Ok(())
}

pub fn print_config<W: Write>(out: &mut W, config: &FixtureConfig) -> Result<()> {
    write!(out, "{}", config.to_yaml()?)?;
    Ok(())
}

pub fn print_openssl_config<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "{BUNDLED_OPENSSL_CONFIG}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plan_is_printed_line_per_step() {
        let layout = Layout::new(PathBuf::from("/w"), PathBuf::from("/o"), None);
        let mut out = Vec::new();
        print_plan(&mut out, &FixtureConfig::default(), &layout, OsStr::new("openssl")).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();

        assert_eq!(lines.len(), 92);
        assert_eq!(lines[0], "# write /w/openssl.cnf");
        assert_eq!(lines[1], "# init CA directory /w/root1-ca");
        assert_eq!(lines[2], "openssl genrsa -out /w/root1-ca/ca.key 3072");
        assert_eq!(lines[4], "cp /w/root1-ca/ca.key /o/root1-ca.key");
        assert_eq!(
            lines[91],
            "CAHOME=/w/inter1A1-ca openssl ca -config /w/openssl.cnf -gencrl \
             -out /o/inter1A1-v1-expired.crl -md sha256 -crlhours 1"
        );
    }

    #[test]
    fn config_dump_mentions_every_ca() {
        let config = FixtureConfig::default();
        let mut out = Vec::new();
        print_config(&mut out, &config).unwrap();
        let out = String::from_utf8(out).unwrap();
        for ca in config.cas() {
            assert!(out.contains(&ca.name), "missing {}", ca.name);
        }
    }

    #[test]
    fn bundled_openssl_config_defines_referenced_sections() {
        let mut out = Vec::new();
        print_openssl_config(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        for section in [
            "ca_exts",
            "end_entity_exts",
            "altname_req",
            "crl_ext",
            "any_policy_exts",
            "1_policy_exts",
            "2_policy_exts",
        ] {
            assert!(out.contains(&format!("[ {section} ]")), "missing {section}");
        }
    }
}
