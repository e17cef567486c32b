//! Validated text primitives shared across the imaging gateway crates.
//!
//! Inbound requests carry free-form strings (query parameters, header values, JSON members).
//! The types here are the point where those strings become trusted values: once constructed
//! they are guaranteed non-empty and trimmed, so downstream code never re-checks.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// A subject reference named a resource type other than `Patient`.
    #[error("expected a Patient reference, got '{0}'")]
    NotAPatientReference(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, or `TextError::Empty` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A reference to a FHIR `Patient` as it appears in a search parameter.
///
/// Accepted forms:
/// - bare logical id: `1234`
/// - relative reference: `Patient/1234`
/// - absolute reference: `http://fhir.example.org/baseDstu3/Patient/1234`
///
/// The original text is kept verbatim (it is what gets echoed back into resources), and the
/// logical id is extracted once. Version suffixes (`/_history/<n>`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientReference {
    original: NonEmptyText,
    id: NonEmptyText,
}

impl PatientReference {
    /// Parse a patient reference from a search parameter value.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let original = NonEmptyText::new(input)?;
        let text = original.as_str();

        let without_history = match text.find("/_history/") {
            Some(index) => &text[..index],
            None => text,
        };
        let segments: Vec<&str> = without_history
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let id = match segments.as_slice() {
            [id] => *id,
            [.., resource_type, id] if *resource_type == "Patient" => *id,
            [.., resource_type, _] => {
                return Err(TextError::NotAPatientReference(
                    (*resource_type).to_string(),
                ))
            }
            [] => return Err(TextError::Empty),
        };

        Ok(Self {
            id: NonEmptyText::new(id)?,
            original,
        })
    }

    /// The reference exactly as supplied (trimmed).
    pub fn as_str(&self) -> &str {
        self.original.as_str()
    }

    /// The logical id of the patient.
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// The reference in relative `Patient/<id>` form.
    pub fn relative(&self) -> String {
        format!("Patient/{}", self.id)
    }
}

impl std::fmt::Display for PatientReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.original.as_str())
    }
}
