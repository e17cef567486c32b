//! Constants used throughout the imaging core crate.
//!
//! DICOM attribute tags are written the way DICOM JSON keys them: eight uppercase hex digits,
//! group then element.

/// Study Instance UID (0020,000D).
pub const DCM_TAG_STUDY_UID: &str = "0020000D";

/// Accession Number (0008,0050).
pub const DCM_TAG_ACCESSION: &str = "00080050";

/// Study ID (0020,0010).
pub const DCM_TAG_STUDY_ID: &str = "00200010";

/// Instance Availability (0008,0056).
pub const DCM_TAG_INSTANCE_AVAILABILITY: &str = "00080056";

/// Modalities in Study (0008,0061).
pub const DCM_TAG_MODALITIES: &str = "00080061";

/// Referring Physician's Name (0008,0090).
pub const DCM_TAG_REF_PHYS: &str = "00080090";

/// Retrieve URL (0008,1190).
pub const DCM_TAG_RETRIEVE_URL: &str = "00081190";

/// Number of Study Related Series (0020,1206).
pub const DCM_TAG_NUM_SERIES: &str = "00201206";

/// Number of Study Related Instances (0020,1208).
pub const DCM_TAG_NUM_INSTANCES: &str = "00201208";

/// Study Date (0008,0020).
pub const DCM_TAG_STUDY_DATE: &str = "00080020";

/// Study Time (0008,0030).
pub const DCM_TAG_STUDY_TIME: &str = "00080030";

/// Patient ID (0010,0020).
pub const DCM_TAG_PATIENT_ID: &str = "00100020";

/// Media type requested from the archive for QIDO-RS queries.
pub const DICOM_JSON_MEDIA_TYPE: &str = "application/dicom+json";

/// QIDO-RS parameter used to pass the modification-time lower bound through to the archive.
pub const MODIFIED_SINCE_PARAM: &str = "updatedTime";

/// FHIR resource type served by the query translator.
pub const IMAGING_STUDY: &str = "ImagingStudy";

/// Prefix of a relative Patient reference.
pub const PATIENT_REFERENCE_PREFIX: &str = "Patient/";

/// Scope action required for searches and retrievals.
pub const READ_ACTION: &str = "read";

/// Default archive (DICOMweb) base URL.
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "http://localhost:8080/dcm4chee-arc/aets/DCM4CHEE/rs";

/// Default token introspection endpoint.
pub const DEFAULT_INTROSPECTION_URL: &str = "http://localhost:9004/api/introspect";

/// Default service prefix in front of FHIR resource paths and `/studies/`.
pub const DEFAULT_SERVICE_PREFIX: &str = "/baseDstu3";

/// Default relay chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default deadline for outbound calls, in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
