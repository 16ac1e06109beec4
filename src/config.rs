//! Fixture configuration: the CA forest, the end entities issued from it and
//! the CRL steps run against it.
//!
//! [`FixtureConfig::default`] is the fixture set the test suite expects.
//! Any of it can be replaced by a YAML or JSON file with the same shape.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// 365 * 10 * 3 days.
pub const DEFAULT_CERT_DAYS: u32 = 10950;
pub const DEFAULT_KEY_LENGTH: usize = 3072;
pub const DEFAULT_DIGEST: &str = "sha256";

/// Extension sections referenced by the default fixtures. They must exist in
/// the OpenSSL configuration file.
pub mod sections {
    pub const CA: &str = "ca_exts";
    pub const END_ENTITY: &str = "end_entity_exts";
    pub const ALTNAME_REQ: &str = "altname_req";
    pub const CRL_V2: &str = "crl_ext";
    pub const ANY_POLICY: &str = "any_policy_exts";
    pub const ONE_POLICY: &str = "1_policy_exts";
    pub const TWO_POLICY: &str = "2_policy_exts";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub key_length: usize,
    pub signing_digest: String,
    pub cert_days: u32,
    /// Falls back to `cert_days`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crl_days: Option<u32>,
    pub ca_exts: String,
    pub end_entity_exts: String,
    pub altname_exts: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            key_length: DEFAULT_KEY_LENGTH,
            signing_digest: DEFAULT_DIGEST.to_owned(),
            cert_days: DEFAULT_CERT_DAYS,
            crl_days: None,
            ca_exts: sections::CA.to_owned(),
            end_entity_exts: sections::END_ENTITY.to_owned(),
            altname_exts: sections::ALTNAME_REQ.to_owned(),
        }
    }
}

impl Settings {
    pub fn crl_days(&self) -> u32 {
        self.crl_days.unwrap_or(self.cert_days)
    }
}

/// A certificate authority and the CAs it signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaNode {
    pub name: String,
    /// Distinguished name without the leading slash, `CN=<name>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Request extension section used when the parent signs this CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exts: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<CaNode>,
}

impl CaNode {
    pub fn new(name: &str) -> Self {
        CaNode {
            name: name.to_owned(),
            subject: None,
            exts: None,
            subs: Vec::new(),
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_owned());
        self
    }

    pub fn exts(mut self, exts: &str) -> Self {
        self.exts = Some(exts.to_owned());
        self
    }

    pub fn sub(mut self, sub: CaNode) -> Self {
        self.subs.push(sub);
        self
    }

    pub fn subject_or_default(&self) -> String {
        self.subject
            .clone()
            .unwrap_or_else(|| format!("CN={}", self.name))
    }
}

/// How long an end-entity certificate is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Days(u32),
    /// Starts at generation time and ends `Duration` later.
    Window(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndEntity {
    pub name: String,
    pub subject: String,
    pub signer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    /// Explicit start/end window, ignored when `days` is set.
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub san: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exts: Option<String>,
    /// Extra `-addext` request extensions, e.g. `keyUsage=digitalSignature`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addext: Vec<String>,
}

impl EndEntity {
    pub fn validity(&self, settings: &Settings) -> Validity {
        match (self.days, self.lifetime) {
            (Some(days), _) => Validity::Days(days),
            (None, Some(lifetime)) => Validity::Window(lifetime),
            (None, None) => Validity::Days(settings.cert_days),
        }
    }

    /// The `SAN` value handed to the request extension section.
    pub fn alt_names(&self) -> Option<String> {
        if self.san.is_empty() {
            None
        } else {
            Some(self.san.join(","))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrlValidity {
    pub days: Option<u32>,
    pub hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CrlStep {
    Gen {
        ca: String,
        out: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hours: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exts: Option<String>,
    },
    Revoke {
        ca: String,
        /// End entity name; its issued certificate is revoked.
        cert: String,
    },
}

impl CrlStep {
    fn gen_crl(ca: &str, out: &str) -> Self {
        CrlStep::Gen {
            ca: ca.to_owned(),
            out: out.to_owned(),
            days: None,
            hours: None,
            exts: None,
        }
    }

    pub fn ca(&self) -> &str {
        match self {
            CrlStep::Gen { ca, .. } | CrlStep::Revoke { ca, .. } => ca,
        }
    }

    /// Only meaningful for [`CrlStep::Gen`]; neither bound set means
    /// `crl_days`.
    pub fn validity(&self, settings: &Settings) -> CrlValidity {
        match self {
            CrlStep::Gen {
                days: None,
                hours: None,
                ..
            } => CrlValidity {
                days: Some(settings.crl_days()),
                hours: None,
            },
            CrlStep::Gen { days, hours, .. } => CrlValidity {
                days: *days,
                hours: *hours,
            },
            CrlStep::Revoke { .. } => CrlValidity {
                days: None,
                hours: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default)]
    pub settings: Settings,
    pub authorities: Vec<CaNode>,
    #[serde(default)]
    pub end_entities: Vec<EndEntity>,
    #[serde(default)]
    pub crls: Vec<CrlStep>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        let settings = Settings::default();
        let authorities = vec![
            CaNode::new("root1-ca")
                .sub(CaNode::new("inter1A-ca").sub(CaNode::new("inter1A1-ca")))
                .sub(CaNode::new("inter1B-ca")),
            CaNode::new("root2-ca")
                .sub(CaNode::new("inter2A-ca"))
                .sub(CaNode::new("inter2B-ca")),
            CaNode::new("root3-ca"),
            CaNode::new("mdt-root")
                .subject("CN=Snakeoil Root CA")
                .sub(
                    CaNode::new("mdt-ica.1")
                        .subject("CN=Snakeoil Metadata Issuing CA #1")
                        .exts(sections::ANY_POLICY),
                )
                .sub(
                    CaNode::new("mdt-ica.2")
                        .subject("CN=Snakeoil Metadata Issuing CA #2")
                        .exts(sections::ONE_POLICY),
                )
                .sub(
                    CaNode::new("mdt-ica.3")
                        .subject("CN=Snakeoil Metadata Issuing CA #3")
                        .exts(sections::TWO_POLICY),
                ),
        ];

        let foo = |name: &str, lifetime: Option<Duration>| EndEntity {
            name: name.to_owned(),
            subject: "CN=foo.example.org".to_owned(),
            signer: "inter1A1-ca".to_owned(),
            days: None,
            lifetime,
            san: vec![
                "DNS:foo.example.org".to_owned(),
                "URI:https://foo.example.org/sp".to_owned(),
            ],
            exts: Some(settings.altname_exts.clone()),
            addext: Vec::new(),
        };
        // Only one -reqexts section per request, so the policy signers carry
        // no alt names.
        let mdt_signer = |n: u8| EndEntity {
            name: format!("mdt-signer.{n}"),
            subject: format!("CN=Snakeoil Metadata Signer #{n}"),
            signer: format!("mdt-ica.{n}"),
            days: None,
            lifetime: None,
            san: Vec::new(),
            exts: Some(sections::ONE_POLICY.to_owned()),
            addext: Vec::new(),
        };
        let end_entities = vec![
            foo("foo-1A1-good", None),
            foo("foo-1A1-expired", Some(Duration::from_secs(10))),
            foo("foo-1A1-revoked", None),
            mdt_signer(1),
            mdt_signer(2),
            mdt_signer(3),
        ];

        let crls = vec![
            CrlStep::gen_crl("inter1A1-ca", "inter1A1-v1-empty.crl"),
            CrlStep::Revoke {
                ca: "inter1A1-ca".to_owned(),
                cert: "foo-1A1-revoked".to_owned(),
            },
            CrlStep::gen_crl("inter1A1-ca", "inter1A1-v1.crl"),
            CrlStep::Gen {
                ca: "inter1A1-ca".to_owned(),
                out: "inter1A1-v2.crl".to_owned(),
                days: None,
                hours: None,
                exts: Some(sections::CRL_V2.to_owned()),
            },
            // Expires an hour after generation.
            CrlStep::Gen {
                ca: "inter1A1-ca".to_owned(),
                out: "inter1A1-v1-expired.crl".to_owned(),
                days: None,
                hours: Some(1),
                exts: None,
            },
        ];

        FixtureConfig {
            settings,
            authorities,
            end_entities,
            crls,
        }
    }
}

impl FixtureConfig {
    pub fn load(path: &Path, format: ConfigFormat) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Every CA in the forest, parents before their children.
    pub fn cas(&self) -> Vec<&CaNode> {
        fn walk<'a>(nodes: &'a [CaNode], out: &mut Vec<&'a CaNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.subs, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.authorities, &mut out);
        out
    }

    pub fn find_ca(&self, name: &str) -> Option<&CaNode> {
        self.cas().into_iter().find(|ca| ca.name == name)
    }

    pub fn find_end_entity(&self, name: &str) -> Option<&EndEntity> {
        self.end_entities.iter().find(|ee| ee.name == name)
    }

    /// CA and end-entity names share the output directory, so they must be
    /// unique across both.
    pub fn validate(&self) -> Result<()> {
        if self.settings.cert_days == 0 {
            return Err(Error::EmptyValidity("cert_days".to_owned()));
        }

        let mut seen = HashSet::new();
        for name in self
            .cas()
            .into_iter()
            .map(|ca| ca.name.as_str())
            .chain(self.end_entities.iter().map(|ee| ee.name.as_str()))
        {
            if !seen.insert(name) {
                return Err(Error::DuplicateName(name.to_owned()));
            }
        }

        for ee in &self.end_entities {
            if self.find_ca(&ee.signer).is_none() {
                return Err(Error::UnknownSigner {
                    entity: ee.name.clone(),
                    signer: ee.signer.clone(),
                });
            }
            match ee.validity(&self.settings) {
                Validity::Days(0) => return Err(Error::EmptyValidity(ee.name.clone())),
                Validity::Window(d) if d.is_zero() => {
                    return Err(Error::EmptyValidity(ee.name.clone()));
                }
                _ => {}
            }
        }

        for step in &self.crls {
            if self.find_ca(step.ca()).is_none() {
                return Err(Error::UnknownCa(step.ca().to_owned()));
            }
            match step {
                CrlStep::Revoke { cert, .. } if self.find_end_entity(cert).is_none() => {
                    return Err(Error::UnknownEndEntity(cert.clone()));
                }
                CrlStep::Gen { out, .. } => {
                    let v = step.validity(&self.settings);
                    if v.days.unwrap_or(0) == 0 && v.hours.unwrap_or(0) == 0 {
                        return Err(Error::EmptyValidity(out.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

mod opt_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
