//! Sign a PDF with long-term-validation evidence, or inspect its signatures.
//!
//! Usage:
//!   pdf_ltv_sign sign <input.pdf> <output.pdf> --key signer.key --certs chain.pem
//!       [--config signer.json] [--tsa URL] [--reason TEXT] [--location TEXT]
//!       [--name TEXT] [--field NAME] [--no-revocation]
//!   pdf_ltv_sign inspect <signed.pdf>
//!
//! Set `RUST_LOG=debug` for pipeline tracing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use pdf_ltv_sign::signatures::{
    DeferredSigner, RsaKeyCapability, SignatureMetadata, SignatureVerifier, SigningRequest,
};
use pdf_ltv_sign::{Error, SignerConfig, TimestampPolicy};

struct SignArgs {
    input: PathBuf,
    output: PathBuf,
    key: PathBuf,
    certs: PathBuf,
    config: Option<PathBuf>,
    tsa: Option<String>,
    reason: Option<String>,
    location: Option<String>,
    name: Option<String>,
    field: Option<String>,
    no_revocation: bool,
}

impl SignArgs {
    fn from_args(args: &[String]) -> Result<Self, String> {
        let mut positional = Vec::new();
        let mut key = None;
        let mut certs = None;
        let mut parsed = SignArgs {
            input: PathBuf::new(),
            output: PathBuf::new(),
            key: PathBuf::new(),
            certs: PathBuf::new(),
            config: None,
            tsa: None,
            reason: None,
            location: None,
            name: None,
            field: None,
            no_revocation: false,
        };

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag))
            };
            match flag {
                "--key" => key = Some(PathBuf::from(value()?)),
                "--certs" => certs = Some(PathBuf::from(value()?)),
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--tsa" => parsed.tsa = Some(value()?),
                "--reason" => parsed.reason = Some(value()?),
                "--location" => parsed.location = Some(value()?),
                "--name" => parsed.name = Some(value()?),
                "--field" => parsed.field = Some(value()?),
                "--no-revocation" => parsed.no_revocation = true,
                other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        if positional.len() != 2 {
            return Err("expected <input.pdf> <output.pdf>".to_string());
        }
        parsed.output = PathBuf::from(positional.pop().unwrap_or_default());
        parsed.input = PathBuf::from(positional.pop().unwrap_or_default());
        parsed.key = key.ok_or("--key is required")?;
        parsed.certs = certs.ok_or("--certs is required")?;
        Ok(parsed)
    }
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  pdf_ltv_sign sign <input.pdf> <output.pdf> --key <key.pem> --certs <chain.pem>");
    eprintln!("      [--config <signer.json>] [--tsa <url>] [--reason <text>] [--location <text>]");
    eprintln!("      [--name <text>] [--field <name>] [--no-revocation]");
    eprintln!("  pdf_ltv_sign inspect <signed.pdf>");
}

/// DER certificates from a PEM bundle, leaf first.
fn read_chain(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
    let data = std::fs::read(path)?;
    let mut chain = Vec::new();
    for pem in x509_parser::pem::Pem::iter_from_buffer(&data) {
        let pem = pem.map_err(|e| Error::InvalidRequest(format!("{}: {}", path.display(), e)))?;
        if pem.label == "CERTIFICATE" {
            chain.push(pem.contents);
        }
    }
    if chain.is_empty() {
        return Err(Error::InvalidRequest(format!("{}: no certificates found", path.display())));
    }
    Ok(chain)
}

fn build_signer(args: &SignArgs) -> Result<DeferredSigner, Error> {
    let mut config = match &args.config {
        Some(path) => SignerConfig::from_json_file(path)?,
        None => SignerConfig::default(),
    };
    if let Some(url) = &args.tsa {
        config = config.with_tsa_url(url.clone());
    }
    if config.tsa_url.is_none() && config.timestamp_policy == TimestampPolicy::Required {
        log::warn!("No timestamp authority configured; signing without a timestamp");
        config = config.with_timestamp_policy(TimestampPolicy::BestEffort);
    }

    #[allow(unused_mut)]
    let mut signer = DeferredSigner::new(config.clone());

    #[cfg(feature = "network")]
    {
        use pdf_ltv_sign::network::{HttpCrlClient, HttpTimestampClient};

        if !args.no_revocation {
            signer = signer.with_revocation_client(Arc::new(HttpCrlClient::new(config.http_timeout())?));
        }
        if let Some(url) = &config.tsa_url {
            signer = signer.with_timestamp_client(Arc::new(HttpTimestampClient::new(url.clone(), config.http_timeout())?));
        }
    }
    #[cfg(not(feature = "network"))]
    {
        let _ = args.no_revocation;
        log::warn!("Built without the network feature; no revocation or timestamp retrieval");
    }

    Ok(signer)
}

fn sign(args: &[String]) -> ExitCode {
    let args = match SignArgs::from_args(args) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("Error: {}", message);
            usage();
            return ExitCode::from(2);
        },
    };

    let prepared = (|| -> Result<(DeferredSigner, SigningRequest), Error> {
        let key = Arc::new(RsaKeyCapability::from_file(&args.key)?);
        let chain = read_chain(&args.certs)?;

        let mut metadata = SignatureMetadata::default();
        if let Some(reason) = &args.reason {
            metadata = metadata.with_reason(reason.clone());
        }
        if let Some(location) = &args.location {
            metadata = metadata.with_location(location.clone());
        }
        if let Some(name) = &args.name {
            metadata = metadata.with_name(name.clone());
        }

        let mut request = SigningRequest::new(&args.input, &args.output, key, chain)?.with_metadata(metadata);
        if let Some(field) = &args.field {
            request = request.with_slot_name(field.clone());
        }
        Ok((build_signer(&args)?, request))
    })();

    let (signer, request) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        },
    };

    match signer.sign(&request) {
        Ok(report) => {
            println!("Signed {}", report.destination.display());
            println!("  Field:              {}", report.reservation.slot_name);
            println!("  Reserved bytes:     {}", report.reservation.capacity);
            println!("  Signature bytes:    {}", report.structure_len);
            println!("  Revocation entries: {}", report.revocation_entries);
            println!("  Timestamp:          {}", if report.timestamp_embedded { "yes" } else { "no" });
            if !report.intermediate_removed {
                println!("  Warning: intermediate document was not removed");
            }
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Error ({}): {}", e.state, e.source);
            ExitCode::FAILURE
        },
    }
}

fn inspect(args: &[String]) -> ExitCode {
    let [path] = args else {
        usage();
        return ExitCode::from(2);
    };

    let result = std::fs::read(path)
        .map_err(Error::from)
        .and_then(SignatureVerifier::new)
        .and_then(|mut verifier| Ok((verifier.inspect()?, verifier.dss_crls()?.len())));

    match result {
        Ok((signatures, dss_crls)) => {
            println!("{}: {} signature(s), {} DSS CRL(s)", path, signatures.len(), dss_crls);
            for sig in signatures {
                println!("  {}", sig.field_name.as_deref().unwrap_or("(unnamed)"));
                if let Some(subject) = &sig.certificate_subject {
                    println!("    Signer:         {}", subject);
                }
                println!("    Covers file:    {}", sig.covers_whole_document);
                println!("    Digest matches: {}", sig.digest_matches);
                println!("    Certificates:   {}", sig.certificate_count);
                println!("    Archived CRLs:  {}", sig.archived_crls);
                println!("    Timestamp:      {}", sig.has_timestamp);
            }
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("sign") => sign(&args[1..]),
        Some("inspect") => inspect(&args[1..]),
        Some(first) if !first.starts_with('-') => sign(&args),
        _ => {
            usage();
            ExitCode::from(2)
        },
    }
}
