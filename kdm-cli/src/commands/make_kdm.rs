use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use clap::Args;
use uuid::Uuid;

use kdm::{CertificateChain, DecryptedKDM, Formulation, Key, KeyRecord, KeyRecordStandard, LocalTime};
use kdm_core::Certificate;

/**
    Build and encrypt a KDM for a single recipient projector or server.
*/
#[derive(Args)]
pub struct MakeKdmCommand {
    /// PEM bundle (root, intermediate, leaf concatenated) of the signing chain.
    #[arg(long)]
    signer_chain: PathBuf,

    /// PKCS#8 PEM private key matching the signing chain's leaf certificate.
    #[arg(long)]
    signer_key: PathBuf,

    /// PEM certificate of the device or server this KDM targets.
    #[arg(long)]
    recipient: PathBuf,

    /// Additional trusted device certificates, for formulations that list devices explicitly.
    #[arg(long = "trusted-device")]
    trusted_devices: Vec<PathBuf>,

    /// Composition Playlist UUID this KDM authorises keys for.
    #[arg(long)]
    cpl_id: Uuid,

    /// Human-readable title, copied into ContentTitleText.
    #[arg(long)]
    title: String,

    /// Free-text annotation. Defaults to "none" if omitted.
    #[arg(long)]
    annotation_text: Option<String>,

    /// xs:dateTime the keys become valid at.
    #[arg(long)]
    not_valid_before: String,

    /// xs:dateTime the keys stop being valid at.
    #[arg(long)]
    not_valid_after: String,

    /// One content key, given as `key-id:key-type:hex-key` (e.g. a 16-byte AES key
    /// as 32 hex characters), with an optional `:scope-uri` fourth field overriding
    /// the `TypedKeyId` scope attribute. May be repeated.
    #[arg(long = "key", required = true)]
    keys: Vec<String>,

    /// Which KDM profile to produce.
    #[arg(long, default_value = "modified-transitional-1")]
    formulation: String,

    /// Binary layout for the key records: `interop` or `smpte`.
    #[arg(long, default_value = "smpte")]
    standard: String,

    #[arg(long)]
    disable_forensic_marking_picture: bool,

    /// Disable audio forensic marking above this channel (0 disables entirely).
    #[arg(long)]
    disable_forensic_marking_audio: Option<i32>,

    /// Override the ContentAuthenticator thumbprint. Defaults to the signer leaf's own.
    #[arg(long)]
    content_authenticator: Option<String>,

    /// Where to write the signed KDM XML.
    #[arg(short, long)]
    output: PathBuf,
}

impl MakeKdmCommand {
    pub fn run(self) -> Result<()> {
        let chain_pem =
            std::fs::read_to_string(&self.signer_chain).context("failed to read signer chain")?;
        let mut signer = CertificateChain::from_pem_bundle(&chain_pem)
            .context("signer chain did not form a valid root-to-leaf chain")?;
        let key_pem =
            std::fs::read_to_string(&self.signer_key).context("failed to read signer key")?;
        signer.set_private_key_pem(key_pem);
        signer
            .validate()
            .context("signer chain's private key does not match its leaf certificate")?;

        tracing::info!(signer = %signer.leaf()?.subject(), "loaded signer chain");

        let recipient_pem =
            std::fs::read_to_string(&self.recipient).context("failed to read recipient certificate")?;
        let recipient = Certificate::parse(&recipient_pem).context("failed to parse recipient")?;
        tracing::info!(recipient = %recipient.subject(), "loaded recipient certificate");

        let mut trusted_devices = Vec::with_capacity(self.trusted_devices.len());
        for path in &self.trusted_devices {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            trusted_devices.push(Certificate::parse(&pem)?);
        }

        let formulation = Formulation::from_str(&self.formulation)
            .with_context(|| format!("unknown formulation '{}'", self.formulation))?;
        let standard = match self.standard.as_str() {
            "interop" => KeyRecordStandard::Interop,
            "smpte" => KeyRecordStandard::Smpte,
            other => bail!("unknown standard '{other}' (expected 'interop' or 'smpte')"),
        };

        let not_valid_before =
            LocalTime::parse(&self.not_valid_before).context("bad --not-valid-before")?;
        let not_valid_after =
            LocalTime::parse(&self.not_valid_after).context("bad --not-valid-after")?;

        let mut kdm = DecryptedKDM::new(
            self.cpl_id,
            self.title.clone(),
            LocalTime::now(),
            not_valid_before,
            not_valid_after,
        );
        kdm.annotation_text = self.annotation_text.clone();

        for spec in &self.keys {
            let (key_id, key_type, hex_key, key_type_scope) = parse_key_spec(spec)?;
            kdm.add_key(KeyRecord {
                standard,
                signer_thumbprint: [0u8; 20],
                cpl_id: self.cpl_id,
                key_id,
                key_type_tag: key_type,
                key_type_scope,
                not_valid_before,
                not_valid_after,
                content_key: Key::from_hex(&hex_key)?,
            })?;
        }
        tracing::info!(count = self.keys.len(), "added key records to KDM");
        kdm.check_window().context("bad validity window")?;

        let encrypted = kdm
            .encrypt(
                &signer,
                &recipient,
                &trusted_devices,
                formulation,
                self.content_authenticator.as_deref(),
                self.disable_forensic_marking_picture,
                self.disable_forensic_marking_audio,
            )
            .context("failed to encrypt KDM")?;

        let xml = encrypted.to_xml().context("failed to render KDM XML")?;
        std::fs::write(&self.output, &xml)
            .with_context(|| format!("failed to write {}", self.output.display()))?;

        println!("wrote {} ({} bytes)", self.output.display(), xml.len());
        println!("message id: {}", encrypted.id());
        Ok(())
    }
}

fn parse_key_spec(spec: &str) -> Result<(Uuid, String, String, Option<String>)> {
    let mut parts = spec.splitn(4, ':');
    let key_id = parts
        .next()
        .context("empty --key")?
        .parse::<Uuid>()
        .context("key id is not a valid UUID")?;
    let key_type = parts
        .next()
        .context("--key is missing a key type (key-id:key-type:hex-key)")?
        .to_owned();
    let hex_key = parts
        .next()
        .context("--key is missing a hex key (key-id:key-type:hex-key)")?
        .to_owned();
    let key_type_scope = parts.next().map(str::to_owned);
    Ok((key_id, key_type, hex_key, key_type_scope))
}
