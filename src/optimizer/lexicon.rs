//! Built-in dictionary extractor.
//!
//! Good enough to tag the common organisms, assays, diseases, chemicals and
//! HGNC-style gene symbols in a search box query without calling out to an
//! NLP service.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::{EntityExtractor, EntityType, ExtractedEntity, ExtractorError};

struct Term {
    entity_type: EntityType,
    canonical_id: &'static str,
    /// First name is the preferred label
    names: &'static [&'static str],
}

const TERMS: &[Term] = &[
    // Organisms
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:9606",
        names: &["homo sapiens", "human", "humans"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:10090",
        names: &["mus musculus", "mouse", "mice"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:10116",
        names: &["rattus norvegicus", "rat", "rats"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:7955",
        names: &["danio rerio", "zebrafish"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:4932",
        names: &["saccharomyces cerevisiae", "yeast"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:7227",
        names: &["drosophila melanogaster", "drosophila", "fruit fly"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:6239",
        names: &["caenorhabditis elegans", "c. elegans"],
    },
    Term {
        entity_type: EntityType::Organism,
        canonical_id: "NCBITaxon:3702",
        names: &["arabidopsis thaliana", "arabidopsis"],
    },
    // Assays
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0001271",
        names: &["rna-seq", "rna sequencing", "transcriptome sequencing"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "EFO:0008913",
        names: &["scrna-seq", "single-cell rna-seq", "single cell rna sequencing"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0000716",
        names: &["chip-seq", "chip sequencing"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0002039",
        names: &["atac-seq"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0001463",
        names: &["microarray", "expression array"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0002117",
        names: &["whole genome sequencing", "wgs"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "OBI:0002623",
        names: &["bisulfite sequencing", "methylation profiling"],
    },
    Term {
        entity_type: EntityType::Assay,
        canonical_id: "EFO:0002766",
        names: &["proteomics", "mass spectrometry"],
    },
    // Diseases
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D001943",
        names: &["breast cancer", "breast neoplasms", "mammary carcinoma"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D008175",
        names: &["lung cancer", "lung neoplasms"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D015179",
        names: &["colorectal cancer", "colorectal neoplasms"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D000544",
        names: &["alzheimer's disease", "alzheimer disease", "alzheimers"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D010300",
        names: &["parkinson's disease", "parkinson disease"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D003920",
        names: &["diabetes mellitus", "diabetes"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D000086382",
        names: &["covid-19", "sars-cov-2 infection"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D007938",
        names: &["leukemia", "leukaemia"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D008545",
        names: &["melanoma"],
    },
    Term {
        entity_type: EntityType::Disease,
        canonical_id: "MESH:D001249",
        names: &["asthma"],
    },
    // Chemicals
    Term {
        entity_type: EntityType::Chemical,
        canonical_id: "MESH:D002945",
        names: &["cisplatin"],
    },
    Term {
        entity_type: EntityType::Chemical,
        canonical_id: "MESH:D004317",
        names: &["doxorubicin"],
    },
    Term {
        entity_type: EntityType::Chemical,
        canonical_id: "MESH:D013629",
        names: &["tamoxifen"],
    },
    Term {
        entity_type: EntityType::Chemical,
        canonical_id: "MESH:D008687",
        names: &["metformin"],
    },
    Term {
        entity_type: EntityType::Chemical,
        canonical_id: "MESH:D003907",
        names: &["dexamethasone"],
    },
    // Tissues and cell types
    Term {
        entity_type: EntityType::Tissue,
        canonical_id: "UBERON:0002107",
        names: &["liver", "hepatic tissue"],
    },
    Term {
        entity_type: EntityType::Tissue,
        canonical_id: "UBERON:0000955",
        names: &["brain"],
    },
    Term {
        entity_type: EntityType::CellType,
        canonical_id: "CL:0000084",
        names: &["t cell", "t cells", "t lymphocyte"],
    },
    Term {
        entity_type: EntityType::CellType,
        canonical_id: "CL:0000236",
        names: &["b cell", "b cells", "b lymphocyte"],
    },
];

/// Well-known symbols without digits that the shape rule would miss
const KNOWN_GENES: &[&str] = &[
    "EGFR", "KRAS", "MYC", "APOE", "PTEN", "BRAF", "ERBB2", "HER2", "ALK", "VEGFA", "ESR1",
];

/// Upper-case tokens that look like symbols but are not genes
const NOT_GENES: &[&str] = &["RNA", "DNA", "PCR", "WGS", "SNP", "GEO", "USA", "COVID", "SARS"];

static GENE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]{1,9}$").expect("static gene regex"));

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9-]*").expect("static token regex"));

struct Pattern {
    term: &'static Term,
    name: &'static str,
    regex: Regex,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let mut patterns: Vec<Pattern> = TERMS
        .iter()
        .flat_map(|term| term.names.iter().map(move |name| (term, *name)))
        .filter_map(|(term, name)| {
            let re = format!(r"(?i)(?:^|[^\w-])({})(?:$|[^\w-])", regex::escape(name));
            Regex::new(&re).ok().map(|regex| Pattern { term, name, regex })
        })
        .collect();
    // Longest names first so "single-cell rna-seq" wins over "rna-seq"
    patterns.sort_by(|a, b| b.name.len().cmp(&a.name.len()));
    patterns
});

/// Dictionary and pattern based entity extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconExtractor;

impl LexiconExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction, in order of appearance
    pub fn extract_sync(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut spans: Vec<(usize, usize, ExtractedEntity)> = Vec::new();

        for pattern in PATTERNS.iter() {
            for caps in pattern.regex.captures_iter(text) {
                let Some(m) = caps.get(1) else { continue };
                if spans.iter().any(|(s, e, _)| m.start() < *e && *s < m.end()) {
                    continue;
                }

                let synonyms = pattern
                    .term
                    .names
                    .iter()
                    .filter(|n| !n.eq_ignore_ascii_case(m.as_str()))
                    .map(|n| n.to_string());
                let entity = ExtractedEntity::new(pattern.term.entity_type, m.as_str())
                    .with_canonical_id(pattern.term.canonical_id)
                    .with_synonyms(synonyms);
                spans.push((m.start(), m.end(), entity));
            }
        }

        for token in TOKEN.find_iter(text) {
            if spans
                .iter()
                .any(|(s, e, _)| token.start() < *e && *s < token.end())
            {
                continue;
            }
            if is_gene_symbol(token.as_str()) {
                spans.push((
                    token.start(),
                    token.end(),
                    ExtractedEntity::new(EntityType::Gene, token.as_str())
                        .with_canonical_id(format!("HGNC:{}", token.as_str())),
                ));
            }
        }

        spans.sort_by_key(|(start, _, _)| *start);
        spans.into_iter().map(|(_, _, entity)| entity).collect()
    }
}

fn is_gene_symbol(token: &str) -> bool {
    if NOT_GENES.contains(&token) || crate::utils::is_accession(token) {
        return false;
    }
    if KNOWN_GENES.contains(&token) {
        return true;
    }
    GENE_SHAPE.is_match(token) && token.chars().any(|c| c.is_ascii_digit())
}

#[async_trait]
impl EntityExtractor for LexiconExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractorError> {
        Ok(self.extract_sync(text))
    }
}
