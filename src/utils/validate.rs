//! Identifier normalization and input validation.
//!
//! Providers disagree on how they spell the same identifier (`doi:10.1/X`,
//! `https://doi.org/10.1/x`, `pmc123`, `PMC123`). Everything that compares or
//! keys on identifiers goes through the normalizers here first.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid DOI format: {0}")]
    InvalidDoi(String),

    #[error("URL points at a private or loopback host")]
    PrivateHost,

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),
}

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:G(?:SE|DS|SM|PL)\d+|E-[A-Z]{4}-\d+|PRJ[EDN][A-Z]\d+|[SED]R[PXS]\d+)$")
        .expect("static accession regex")
});

static PMCID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PMC\d{1,10}$").expect("static pmcid regex"));

static PMID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,9}$").expect("static pmid regex"));

/// Normalize a DOI: strip `doi:` and resolver prefixes, lowercase.
///
/// Returns `Err` when the result does not look like `10.<registrant>/<suffix>`.
pub fn normalize_doi(doi: &str) -> Result<String, ValidationError> {
    let doi = doi.trim().to_lowercase();

    if doi.is_empty() {
        return Err(ValidationError::InvalidDoi("empty DOI".to_string()));
    }

    let doi = doi.strip_prefix("doi:").unwrap_or(&doi).trim();
    let doi = doi.strip_prefix("https://doi.org/").unwrap_or(doi);
    let doi = doi.strip_prefix("http://doi.org/").unwrap_or(doi);
    let doi = doi.strip_prefix("https://dx.doi.org/").unwrap_or(doi);

    if !doi.starts_with("10.") {
        return Err(ValidationError::InvalidDoi(
            "DOI must start with '10.'".to_string(),
        ));
    }

    let Some((prefix, suffix)) = doi.split_once('/') else {
        return Err(ValidationError::InvalidDoi(
            "DOI must contain a slash".to_string(),
        ));
    };

    if prefix.len() < 4 || suffix.is_empty() {
        return Err(ValidationError::InvalidDoi(doi.to_string()));
    }

    if doi.contains("..") {
        return Err(ValidationError::InvalidDoi(
            "path traversal detected".to_string(),
        ));
    }

    Ok(doi.to_string())
}

/// Normalize a PubMed Central id to the `PMC<digits>` form.
///
/// Accepts `PMC123`, `pmc123`, `PMC 123` and bare digits.
pub fn normalize_pmcid(pmcid: &str) -> Result<String, ValidationError> {
    let cleaned: String = pmcid
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let candidate = if cleaned.starts_with("PMC") {
        cleaned
    } else {
        format!("PMC{}", cleaned)
    };

    if PMCID_RE.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(ValidationError::InvalidIdentifier(pmcid.to_string()))
    }
}

/// Normalize a PubMed id (`PMID:123`, `pmid 123`, `123`).
pub fn normalize_pmid(pmid: &str) -> Result<String, ValidationError> {
    let trimmed = pmid.trim();
    let lower = trimmed.to_lowercase();
    let digits = lower
        .strip_prefix("pmid")
        .map(|rest| rest.trim_start_matches([':', ' ']))
        .unwrap_or(&lower);

    let stripped = digits.trim_start_matches('0');
    if PMID_RE.is_match(digits) && !stripped.is_empty() {
        Ok(stripped.to_string())
    } else {
        Err(ValidationError::InvalidIdentifier(pmid.to_string()))
    }
}

/// Normalize a data-archive accession (GEO, ArrayExpress, BioProject, SRA).
pub fn normalize_accession(accession: &str) -> Result<String, ValidationError> {
    let upper = accession.trim().to_uppercase();
    if ACCESSION_RE.is_match(&upper) {
        Ok(upper)
    } else {
        Err(ValidationError::InvalidIdentifier(accession.to_string()))
    }
}

/// True when the string is a recognised archive accession.
pub fn is_accession(candidate: &str) -> bool {
    ACCESSION_RE.is_match(&candidate.trim().to_uppercase())
}

/// Validate a URL: only `http`/`https`, no embedded control characters.
///
/// With `block_private_hosts` set, loopback and RFC 1918 hosts are rejected
/// so that a hostile upstream cannot redirect fetches onto the local network.
pub fn validate_url(url: &str, block_private_hosts: bool) -> Result<url::Url, ValidationError> {
    let url = url.trim();

    if url.is_empty() {
        return Err(ValidationError::InvalidUrl("empty URL".to_string()));
    }

    if url.contains(['\0', '\n', '\r']) {
        return Err(ValidationError::InvalidUrl(
            "contains control characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidUrl(format!(
                "invalid scheme: {}",
                other
            )))
        }
    }

    if block_private_hosts {
        if let Some(host) = parsed.host_str() {
            if is_private_host(host) {
                return Err(ValidationError::PrivateHost);
            }
        }
    }

    Ok(parsed)
}

fn is_private_host(host: &str) -> bool {
    let host = host.trim_matches(['[', ']']).to_lowercase();
    if host == "localhost" || host == "0.0.0.0" || host == "::1" {
        return true;
    }

    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(std::net::IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => false,
    }
}

/// Turn an identifier into a safe single path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, so `10.1000/xyz` maps to
/// `10.1000_xyz`.
pub fn sanitize_filename(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::InvalidIdentifier("empty name".to_string()));
    }

    if name.contains("..") {
        return Err(ValidationError::PathTraversal(name.to_string()));
    }

    let mut sanitized: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    const MAX_FILENAME_LENGTH: usize = 200;
    if sanitized.len() > MAX_FILENAME_LENGTH {
        sanitized.truncate(MAX_FILENAME_LENGTH);
    }

    let sanitized = sanitized.trim_matches('.').to_string();
    if sanitized.is_empty() {
        return Err(ValidationError::InvalidIdentifier(name.to_string()));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_doi_prefixes() {
        assert_eq!(normalize_doi("10.1234/ABC123").unwrap(), "10.1234/abc123");
        assert_eq!(normalize_doi("doi:10.1234/abc123").unwrap(), "10.1234/abc123");
        assert_eq!(
            normalize_doi("https://doi.org/10.1234/abc123").unwrap(),
            "10.1234/abc123"
        );
        assert_eq!(
            normalize_doi("  DOI: 10.1038/Nature12345 ").unwrap(),
            "10.1038/nature12345"
        );
    }

    #[test]
    fn test_normalize_doi_invalid() {
        assert!(normalize_doi("").is_err());
        assert!(normalize_doi("10.1234").is_err());
        assert!(normalize_doi("9.1234/abc").is_err());
        assert!(normalize_doi("10.1234/../abc").is_err());
    }

    #[test]
    fn test_normalize_pmcid() {
        assert_eq!(normalize_pmcid("PMC123456").unwrap(), "PMC123456");
        assert_eq!(normalize_pmcid("pmc123456").unwrap(), "PMC123456");
        assert_eq!(normalize_pmcid("123456").unwrap(), "PMC123456");
        assert_eq!(normalize_pmcid("PMC 42").unwrap(), "PMC42");
        assert!(normalize_pmcid("PMCabc").is_err());
    }

    #[test]
    fn test_normalize_pmid() {
        assert_eq!(normalize_pmid("PMID:31452104").unwrap(), "31452104");
        assert_eq!(normalize_pmid("pmid 31452104").unwrap(), "31452104");
        assert_eq!(normalize_pmid("31452104").unwrap(), "31452104");
        assert!(normalize_pmid("3145a").is_err());
        assert!(normalize_pmid("0000").is_err());
    }

    #[test]
    fn test_accessions() {
        assert_eq!(normalize_accession("gse100003").unwrap(), "GSE100003");
        assert!(is_accession("GDS5826"));
        assert!(is_accession("E-MTAB-5061"));
        assert!(is_accession("PRJNA257197"));
        assert!(is_accession("SRP012345"));
        assert!(!is_accession("GSE"));
        assert!(!is_accession("breast"));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.ebi.ac.uk/europepmc", true).is_ok());
        assert!(validate_url("ftp://example.com", true).is_err());
        assert!(validate_url("javascript:alert(1)", true).is_err());
        assert_eq!(
            validate_url("http://127.0.0.1:8000/x", true).unwrap_err(),
            ValidationError::PrivateHost
        );
        assert!(validate_url("http://127.0.0.1:8000/x", false).is_ok());
        assert!(validate_url("http://192.168.1.4/x", true).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("PMC123").unwrap(), "PMC123");
        assert_eq!(sanitize_filename("10.1000/xyz").unwrap(), "10.1000_xyz");
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("   ").is_err());
    }
}
