use clap::{Parser, Subcommand};
use fhir::{Bundle, SearchBundleData};
use imaging_core::config::config_from_lookup;
use imaging_core::constants::{
    DCM_TAG_PATIENT_ID, DCM_TAG_STUDY_UID, IMAGING_STUDY, PATIENT_REFERENCE_PREFIX,
};
use imaging_core::dicom::parse_dicom_json;
use imaging_core::mapper::map_study;
use imaging_core::translator::SearchRequest;
use imaging_core::{GatewayServices, SearchParams};
use imaging_types::PatientReference;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

#[derive(Parser)]
#[command(name = "imaging")]
#[command(about = "Imaging gateway operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a DICOM JSON query result file to an ImagingStudy Bundle (offline)
    Map {
        /// File holding a QIDO-RS study-level response
        file: String,
        /// Patient reference for every study (default: each record's Patient ID)
        #[arg(long)]
        patient: Option<String>,
        /// Self link of the Bundle
        #[arg(long, default_value = "urn:imaging:offline")]
        url: String,
    },
    /// Search the configured archive for a patient's studies
    Search {
        /// Patient reference (`1234`, `Patient/1234` or a full URL)
        #[arg(long)]
        patient: String,
        /// `_lastUpdated` bound, e.g. `ge2023-06-15`
        #[arg(long)]
        last_updated: Option<String>,
        /// Bearer token (needed unless authentication is disabled)
        #[arg(long)]
        token: Option<String>,
    },
    /// Ask the introspection service whether a token may read a resource
    Introspect {
        /// Bearer token
        #[arg(long)]
        token: String,
        /// Patient the token is presented for
        #[arg(long)]
        patient: String,
        /// Resource type to check read access for
        #[arg(long, default_value = IMAGING_STUDY)]
        resource: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Map { file, patient, url }) => {
            let contents = std::fs::read(&file)?;
            match map_file(&contents, patient.as_deref(), &url) {
                Ok(bundle) => println!("{bundle}"),
                Err(e) => eprintln!("Error mapping {}: {}", file, e),
            }
        }
        Some(Commands::Search {
            patient,
            last_updated,
            token,
        }) => {
            let services = services()?;
            let mut pairs = vec![("patient".to_string(), patient.clone())];
            if let Some(bound) = last_updated {
                pairs.push(("_lastUpdated".to_string(), bound));
            }
            let request = SearchRequest {
                url: format!("urn:imaging:cli:ImagingStudy?patient={patient}"),
                params: SearchParams::new(pairs),
                headers: bearer_headers(token.as_deref())?,
            };
            match services.translator.translate(&request).await {
                Ok(bundle) => println!("{bundle}"),
                Err(e) => eprintln!("Error searching for {}: {}", patient, e),
            }
        }
        Some(Commands::Introspect {
            token,
            patient,
            resource,
        }) => {
            let services = services()?;
            match services.introspector.introspect(&token, &patient).await {
                Ok(result) => {
                    println!("Subject: {}", result.subject);
                    println!("Scopes: {}", result.scope);
                }
                Err(e) => eprintln!("Introspection failed: {}", e),
            }
            let headers = bearer_headers(Some(&token))?;
            match services
                .gatekeeper
                .authorize_subject(&patient, &headers, &resource)
                .await
            {
                Ok(decision) => println!("Granted: {}", decision.reason),
                Err(e) => println!("Denied: {}", e),
            }
        }
        None => {
            println!("No command given; try --help");
        }
    }

    Ok(())
}

fn services() -> Result<GatewayServices, Box<dyn std::error::Error>> {
    let config = config_from_lookup(|name| std::env::var(name).ok())?;
    Ok(GatewayServices::new(&config)?)
}

fn bearer_headers(token: Option<&str>) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
    }
    Ok(headers)
}

/// Map a QIDO-RS response body into a rendered Bundle.
///
/// Without a fixed `patient`, records carrying no Patient ID are left out of the Bundle.
fn map_file(
    contents: &[u8],
    patient: Option<&str>,
    url: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let fixed = patient.map(PatientReference::parse).transpose()?;
    let records = parse_dicom_json(contents)?;

    let entries = records
        .iter()
        .filter_map(|record| {
            let subject = match (&fixed, record.first(DCM_TAG_PATIENT_ID)) {
                (Some(reference), _) => reference.relative(),
                (None, Some(id)) => format!("{PATIENT_REFERENCE_PREFIX}{id}"),
                (None, None) => {
                    eprintln!(
                        "Skipping study {}: no Patient ID",
                        record.first(DCM_TAG_STUDY_UID).unwrap_or("<no uid>")
                    );
                    return None;
                }
            };
            Some(map_study(record, &subject))
        })
        .collect();

    Ok(Bundle::render(&SearchBundleData::new(url, entries))?)
}
