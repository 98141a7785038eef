use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use kdm::{Certificate, EncryptedKDM, LocalTime};

/**
    Verify a KDM's embedded signer chain is internally consistent and, if
    `--trusted-root` is given, that its digests, signature, and chain of
    trust all check out against the caller's own roots.
*/
#[derive(Args)]
pub struct VerifyCommand {
    /// Path to a KDM XML file.
    path: PathBuf,

    /// PEM certificate(s) the signer's chain must terminate at. Required to check the
    /// cryptographic signature; without it only chain self-consistency is checked.
    #[arg(long = "trusted-root")]
    trusted_roots: Vec<PathBuf>,

    /// Check validity at this xs:dateTime instead of now.
    #[arg(long)]
    at: Option<String>,
}

impl VerifyCommand {
    pub fn run(self) -> Result<()> {
        let xml = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let kdm = EncryptedKDM::parse(&xml).context("failed to parse KDM")?;

        let chain = kdm
            .signer_certificate_chain()
            .context("failed to reconstruct signer chain from KeyInfo")?;
        chain
            .root_to_leaf()
            .context("embedded signer chain does not form a valid root-to-leaf chain")?;
        tracing::info!(path = %self.path.display(), certificates = chain.unordered().len(), "signer chain validated");
        println!("signer chain: OK ({} certificates)", chain.unordered().len());

        if !self.trusted_roots.is_empty() {
            let mut trust_roots = Vec::with_capacity(self.trusted_roots.len());
            for path in &self.trusted_roots {
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                trust_roots.push(Certificate::parse(&pem).context("failed to parse trusted root")?);
            }
            kdm.verify_signature(&trust_roots)
                .context("signature verification failed")?;
            println!("signature: OK (digest, signature, and trust anchor all verified)");
        }

        let at = match &self.at {
            Some(s) => LocalTime::parse(s).context("bad --at")?,
            None => LocalTime::now(),
        };
        if at < kdm.not_valid_before() || at > kdm.not_valid_after() {
            bail!(
                "KDM is not valid at {at}: window is {}..{}",
                kdm.not_valid_before(),
                kdm.not_valid_after()
            );
        }
        println!("validity window: OK (valid at {at})");

        Ok(())
    }
}
