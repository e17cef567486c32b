//! Archive record to `ImagingStudy` mapping.
//!
//! The mapper is total: every record produces a study. A field is populated only when its tag
//! is present with a non-empty first value that converts cleanly; anything else leaves the
//! field unset and, when the value was present but unusable, logs a warning.

use crate::constants::{
    DCM_TAG_ACCESSION, DCM_TAG_INSTANCE_AVAILABILITY, DCM_TAG_MODALITIES, DCM_TAG_NUM_INSTANCES,
    DCM_TAG_NUM_SERIES, DCM_TAG_REF_PHYS, DCM_TAG_RETRIEVE_URL, DCM_TAG_STUDY_DATE,
    DCM_TAG_STUDY_ID, DCM_TAG_STUDY_TIME, DCM_TAG_STUDY_UID,
};
use crate::dicom::ArchiveRecord;
use chrono::{NaiveDate, NaiveDateTime};
use fhir::{Availability, ImagingStudyData, StudyStart};

const DICOM_DATE_FORMAT: &str = "%Y%m%d";
const DICOM_DATE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Map one archive record to an ImagingStudy belonging to `patient_reference`.
pub fn map_study(record: &ArchiveRecord, patient_reference: &str) -> ImagingStudyData {
    let uid = record.first(DCM_TAG_STUDY_UID).map(str::to_string);
    if uid.is_none() {
        tracing::warn!("archive record has no Study Instance UID; mapping without uid");
    }

    ImagingStudyData {
        patient: patient_reference.to_string(),
        uid,
        accession: record.first(DCM_TAG_ACCESSION).map(str::to_string),
        identifiers: collect_non_empty(record, DCM_TAG_STUDY_ID),
        availability: record
            .first(DCM_TAG_INSTANCE_AVAILABILITY)
            .and_then(|code| {
                let availability = Availability::from_code(code);
                if availability.is_none() {
                    tracing::warn!("ignoring unknown instance availability '{}'", code);
                }
                availability
            }),
        modalities: collect_non_empty(record, DCM_TAG_MODALITIES),
        referrer: record.first(DCM_TAG_REF_PHYS).map(str::to_string),
        endpoints: collect_non_empty(record, DCM_TAG_RETRIEVE_URL),
        number_of_series: parse_count(record, DCM_TAG_NUM_SERIES),
        number_of_instances: parse_count(record, DCM_TAG_NUM_INSTANCES),
        started: study_start(
            record.first(DCM_TAG_STUDY_DATE),
            record.first(DCM_TAG_STUDY_TIME),
        ),
    }
}

/// Combine a DICOM date (`YYYYMMDD`) and time (`HHMMSS[.FFFFFF]`) into a study start.
///
/// Only an 8-character date is accepted. The time is truncated at its fractional separator;
/// if exactly six characters remain the two are parsed together, otherwise the date alone is
/// used. Parse failures yield `None`.
pub fn study_start(date: Option<&str>, time: Option<&str>) -> Option<StudyStart> {
    let date = date?;
    if date.len() != 8 {
        return None;
    }

    let time = time.unwrap_or_default();
    let time = match time.find('.') {
        Some(index) => &time[..index],
        None => time,
    };

    if time.len() == 6 {
        NaiveDateTime::parse_from_str(&format!("{date}{time}"), DICOM_DATE_TIME_FORMAT)
            .ok()
            .map(StudyStart::DateTime)
    } else {
        NaiveDate::parse_from_str(date, DICOM_DATE_FORMAT)
            .ok()
            .map(StudyStart::Date)
    }
}

fn collect_non_empty(record: &ArchiveRecord, tag: &str) -> Vec<String> {
    record.non_empty_values(tag).map(str::to_string).collect()
}

fn parse_count(record: &ArchiveRecord, tag: &str) -> Option<u32> {
    let raw = record.first(tag)?;
    match raw.trim().parse::<u32>() {
        Ok(count) => Some(count),
        Err(_) => {
            tracing::warn!("ignoring non-numeric count '{}' for tag {}", raw, tag);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &[&str])]) -> ArchiveRecord {
        pairs
            .iter()
            .map(|(tag, values)| {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                (*tag, values)
            })
            .collect()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> StudyStart {
        StudyStart::DateTime(
            NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|date| date.and_hms_opt(h, min, s))
                .expect("valid date-time"),
        )
    }

    #[test]
    fn maps_every_populated_tag() {
        let rec = record(&[
            (DCM_TAG_STUDY_UID, &["1.2.840.1"]),
            (DCM_TAG_ACCESSION, &["ACC1"]),
            (DCM_TAG_STUDY_ID, &["SID1"]),
            (DCM_TAG_INSTANCE_AVAILABILITY, &["NEARLINE"]),
            (DCM_TAG_MODALITIES, &["CT", "MR"]),
            (DCM_TAG_REF_PHYS, &["Jones^Ann"]),
            (DCM_TAG_RETRIEVE_URL, &["http://archive/rs/studies/1.2.840.1"]),
            (DCM_TAG_NUM_SERIES, &["2"]),
            (DCM_TAG_NUM_INSTANCES, &["57"]),
            (DCM_TAG_STUDY_DATE, &["20230615"]),
            (DCM_TAG_STUDY_TIME, &["093045.123"]),
        ]);

        let study = map_study(&rec, "Patient/1234");

        assert_eq!(study.patient, "Patient/1234");
        assert_eq!(study.uid.as_deref(), Some("1.2.840.1"));
        assert_eq!(study.accession.as_deref(), Some("ACC1"));
        assert_eq!(study.identifiers, ["SID1"]);
        assert_eq!(study.availability, Some(Availability::Nearline));
        assert_eq!(study.modalities, ["CT", "MR"]);
        assert_eq!(study.referrer.as_deref(), Some("Jones^Ann"));
        assert_eq!(study.endpoints, ["http://archive/rs/studies/1.2.840.1"]);
        assert_eq!(study.number_of_series, Some(2));
        assert_eq!(study.number_of_instances, Some(57));
        assert_eq!(study.started, Some(at(2023, 6, 15, 9, 30, 45)));
    }

    #[test]
    fn absent_or_empty_tags_leave_fields_unset() {
        let rec = record(&[
            (DCM_TAG_ACCESSION, &[""]),
            (DCM_TAG_STUDY_ID, &[]),
            (DCM_TAG_MODALITIES, &["", ""]),
        ]);

        let study = map_study(&rec, "Patient/1");

        assert_eq!(
            study,
            ImagingStudyData {
                patient: "Patient/1".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn malformed_optional_values_are_dropped() {
        let rec = record(&[
            (DCM_TAG_STUDY_UID, &["1.2"]),
            (DCM_TAG_INSTANCE_AVAILABILITY, &["SOMEWHERE"]),
            (DCM_TAG_NUM_SERIES, &["two"]),
            (DCM_TAG_NUM_INSTANCES, &["-4"]),
            (DCM_TAG_STUDY_DATE, &["2023-06-15"]),
        ]);

        let study = map_study(&rec, "Patient/1");

        assert_eq!(study.uid.as_deref(), Some("1.2"));
        assert_eq!(study.availability, None);
        assert_eq!(study.number_of_series, None);
        assert_eq!(study.number_of_instances, None);
        assert_eq!(study.started, None);
    }

    #[test]
    fn empty_values_are_skipped_in_lists() {
        let rec = record(&[(DCM_TAG_MODALITIES, &["CT", "", "SR"])]);
        assert_eq!(map_study(&rec, "Patient/1").modalities, ["CT", "SR"]);
    }

    #[test]
    fn start_truncates_fractional_seconds() {
        assert_eq!(
            study_start(Some("20230615"), Some("093045.123")),
            Some(at(2023, 6, 15, 9, 30, 45))
        );
    }

    #[test]
    fn start_without_time_is_date_only() {
        let expected = NaiveDate::from_ymd_opt(2023, 6, 15).map(StudyStart::Date);
        assert_eq!(study_start(Some("20230615"), Some("")), expected);
        assert_eq!(study_start(Some("20230615"), None), expected);
        assert_eq!(study_start(Some("20230615"), Some("0930")), expected);
    }

    #[test]
    fn start_requires_eight_character_date() {
        assert_eq!(study_start(Some("2023061"), Some("093045")), None);
        assert_eq!(study_start(Some("202306150"), Some("093045")), None);
        assert_eq!(study_start(None, Some("093045")), None);
    }

    #[test]
    fn start_with_invalid_time_is_unset() {
        assert_eq!(study_start(Some("20230615"), Some("256199")), None);
        assert_eq!(study_start(Some("20231345"), None), None);
    }
}
