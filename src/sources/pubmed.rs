//! PubMed research source implementation using E-utilities API.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use super::eutils::EUtils;
use crate::models::{Identifier, IdentifierKind, RecordBuilder, RecordQuality, SourceRecord};
use crate::sources::{SourceCapabilities, SourceClient, SourceError, SourceQuery};
use crate::optimizer::retain_field_tags;
use crate::utils::HttpClient;

/// Field tags from the optimized query that the PubMed index understands
const FIELD_TAGS: &[&str] = &["MeSH Terms", "Substance Name"];

/// PubMed research source
///
/// Uses NCBI E-utilities `esearch` for matching and `efetch` (XML) for the
/// bibliographic records.
#[derive(Debug, Clone)]
pub struct PubMedSource {
    eutils: EUtils,
}

impl PubMedSource {
    /// Create a new PubMed source
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            eutils: EUtils::new(http, api_key),
        }
    }

    /// Point at a different E-utilities host (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.eutils.set_base_url(base_url);
        self
    }

    /// Build the `term` parameter from the optimized query and filters
    fn build_term(query: &SourceQuery) -> String {
        let mut term = retain_field_tags(&query.text, FIELD_TAGS);
        if let Some(organism) = &query.filters.organism {
            term = format!("({}) AND \"{}\"[MeSH Terms]", term, organism);
        }
        term
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<SourceRecord>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let xml = self.eutils.efetch("pubmed", ids, "xml").await?;
        parse_fetch_response(&xml)
    }
}

/// Parse E-utilities fetch response XML
fn parse_fetch_response(xml: &str) -> Result<Vec<SourceRecord>, SourceError> {
    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubmedArticleSet {
        #[serde(rename = "PubmedArticle", default)]
        articles: Vec<PubmedArticle>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubmedArticle {
        MedlineCitation: Option<MedlineCitation>,
        PubmedData: Option<PubmedData>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct MedlineCitation {
        PMID: Option<Text>,
        Article: Option<Article>,
    }

    #[derive(Debug, Deserialize)]
    struct Text {
        #[serde(rename = "$text", default)]
        value: String,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Article {
        Journal: Option<Journal>,
        ArticleTitle: Option<Text>,
        Abstract: Option<Abstract>,
        AuthorList: Option<AuthorList>,
        PublicationTypeList: Option<PublicationTypeList>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Journal {
        Title: Option<Text>,
        JournalIssue: Option<JournalIssue>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct JournalIssue {
        PubDate: Option<PubDate>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubDate {
        Year: Option<String>,
        #[serde(rename = "MedlineDate")]
        medline_date: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Abstract {
        #[serde(rename = "AbstractText", default)]
        abstract_texts: Vec<Text>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct AuthorList {
        #[serde(rename = "Author", default)]
        authors: Vec<Author>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Author {
        LastName: Option<Text>,
        ForeName: Option<Text>,
        CollectiveName: Option<Text>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PublicationTypeList {
        #[serde(rename = "PublicationType", default)]
        types: Vec<Text>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubmedData {
        ArticleIdList: Option<ArticleIdList>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct ArticleIdList {
        #[serde(rename = "ArticleId", default)]
        ids: Vec<ArticleId>,
    }

    #[derive(Debug, Deserialize)]
    struct ArticleId {
        #[serde(rename = "@IdType", default)]
        id_type: String,
        #[serde(rename = "$text", default)]
        value: String,
    }

    let result: PubmedArticleSet = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e)))?;

    let mut records = Vec::with_capacity(result.articles.len());

    for article in result.articles {
        let Some(citation) = article.MedlineCitation else {
            continue;
        };
        let pmid = citation
            .PMID
            .map(|p| p.value.trim().to_string())
            .unwrap_or_default();
        if pmid.is_empty() {
            continue;
        }
        let Some(art) = citation.Article else {
            continue;
        };

        let title = art
            .ArticleTitle
            .map(|t| t.value.trim().to_string())
            .unwrap_or_default();

        let authors: Vec<String> = art
            .AuthorList
            .map(|al| {
                al.authors
                    .into_iter()
                    .map(|author| match author.CollectiveName {
                        Some(collective) => collective.value,
                        None => {
                            let first = author.ForeName.map(|f| f.value).unwrap_or_default();
                            let last = author.LastName.map(|l| l.value).unwrap_or_default();
                            format!("{} {}", first, last).trim().to_string()
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let abstract_text = art
            .Abstract
            .map(|ab| {
                ab.abstract_texts
                    .into_iter()
                    .map(|at| at.value)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let journal_title = art
            .Journal
            .as_ref()
            .and_then(|j| j.Title.as_ref())
            .map(|t| t.value.clone());

        let year = art
            .Journal
            .as_ref()
            .and_then(|j| j.JournalIssue.as_ref())
            .and_then(|ji| ji.PubDate.as_ref())
            .and_then(|pd| pd.Year.as_ref().or(pd.medline_date.as_ref()))
            .and_then(|date| leading_year(date));

        let publication_type = art
            .PublicationTypeList
            .and_then(|list| list.types.into_iter().next())
            .map(|t| t.value);

        let article_ids = article
            .PubmedData
            .and_then(|pd| pd.ArticleIdList)
            .map(|list| list.ids)
            .unwrap_or_default();
        let find_id = |kind: &str| {
            article_ids
                .iter()
                .find(|id| id.id_type.eq_ignore_ascii_case(kind))
                .map(|id| id.value.trim().to_string())
        };

        let mut builder = RecordBuilder::publication("pubmed", pmid.as_str(), title)
            .pmid(pmid.as_str())
            .summary(abstract_text)
            .authors(authors)
            .url(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid))
            .quality(RecordQuality::StructuredXml)
            .metadata(serde_json::json!({ "journal": journal_title }));

        if let Some(doi) = find_id("doi") {
            builder = builder.doi(doi);
        }
        if let Some(pmc) = find_id("pmc") {
            builder = builder.pmc_id(pmc);
        }
        if let Some(year) = year {
            builder = builder.year(year);
        }
        if let Some(kind) = publication_type {
            builder = builder.record_type(kind);
        }

        records.push(builder.build());
    }

    Ok(records)
}

/// First four-digit year in a PubMed date string ("2019", "2019 Aug-Sep")
pub(crate) fn leading_year(date: &str) -> Option<i32> {
    date.split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 4)
        .and_then(|part| part.parse().ok())
}

#[async_trait]
impl SourceClient for PubMedSource {
    fn id(&self) -> &str {
        "pubmed"
    }

    fn name(&self) -> &str {
        "PubMed"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    fn quality(&self) -> RecordQuality {
        RecordQuality::StructuredXml
    }

    fn supports_identifier(&self, kind: IdentifierKind) -> bool {
        matches!(kind, IdentifierKind::Pmid | IdentifierKind::Doi)
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        let term = Self::build_term(query);
        let ids = self
            .eutils
            .esearch("pubmed", &term, query.max_results)
            .await?;
        tracing::debug!("PubMed matched {} ids", ids.len());
        self.fetch_records(&ids).await
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        let ids = match identifier {
            Identifier::Pmid(pmid) => vec![pmid.clone()],
            Identifier::Doi(doi) => {
                self.eutils
                    .esearch("pubmed", &format!("\"{}\"[doi]", doi), 1)
                    .await?
            }
            _ => return Err(SourceError::NotImplemented),
        };

        let records = self.fetch_records(&ids).await?;
        if records.is_empty() {
            return Err(SourceError::NotFound(identifier.to_string()));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RetryConfig;

    const EFETCH_XML: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE">
      <PMID Version="1">31452104</PMID>
      <Article>
        <Journal>
          <Title>Nature Communications</Title>
          <JournalIssue><PubDate><Year>2019</Year><Month>Aug</Month></PubDate></JournalIssue>
        </Journal>
        <ArticleTitle>Transcriptomic profiling of breast cancer</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Breast cancer is heterogeneous.</AbstractText>
          <AbstractText Label="RESULTS">We profiled 12 tumours.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Doe</LastName><ForeName>Jane</ForeName></Author>
          <Author><CollectiveName>Cancer Atlas Consortium</CollectiveName></Author>
        </AuthorList>
        <PublicationTypeList><PublicationType UI="D016428">Journal Article</PublicationType></PublicationTypeList>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">31452104</ArticleId>
        <ArticleId IdType="doi">10.1038/s41467-019-1</ArticleId>
        <ArticleId IdType="pmc">PMC7000001</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn source(url: &str) -> PubMedSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        PubMedSource::new(http, None).with_base_url(url)
    }

    #[test]
    fn test_parse_fetch_response() {
        let records = parse_fetch_response(EFETCH_XML).unwrap();
        assert_eq!(records.len(), 1);

        let data = records[0].data();
        assert_eq!(data.source_id, "31452104");
        assert_eq!(data.title, "Transcriptomic profiling of breast cancer");
        assert_eq!(data.authors, vec!["Jane Doe", "Cancer Atlas Consortium"]);
        assert_eq!(data.year, Some(2019));
        assert_eq!(data.ids.doi.as_deref(), Some("10.1038/s41467-019-1"));
        assert_eq!(data.ids.pmc_id.as_deref(), Some("PMC7000001"));
        assert_eq!(data.record_type.as_deref(), Some("Journal Article"));
        assert!(data.summary.contains("We profiled 12 tumours."));
        assert_eq!(data.quality, RecordQuality::StructuredXml);
    }

    #[test]
    fn test_leading_year() {
        assert_eq!(leading_year("2019"), Some(2019));
        assert_eq!(leading_year("2018 Dec-2019 Jan"), Some(2018));
        assert_eq!(leading_year("Spring"), None);
    }

    #[test]
    fn test_build_term_with_organism() {
        let mut query = SourceQuery::plain("breast cancer", 5);
        query.filters.organism = Some("Homo sapiens".to_string());
        assert_eq!(
            PubMedSource::build_term(&query),
            "(breast cancer) AND \"Homo sapiens\"[MeSH Terms]"
        );
    }

    #[test]
    fn test_build_term_drops_dataset_tags() {
        let query = SourceQuery::plain(
            "(\"breast cancer\"[MeSH Terms] AND RNA-seq[DataSet Type]) OR (breast cancer RNA-seq)",
            5,
        );
        assert_eq!(
            PubMedSource::build_term(&query),
            "(\"breast cancer\"[MeSH Terms] AND RNA-seq) OR (breast cancer RNA-seq)"
        );
    }

    #[tokio::test]
    async fn test_search_uses_esearch_then_efetch() {
        let mut server = mockito::Server::new_async().await;
        let esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("db".into(), "pubmed".into()),
                mockito::Matcher::UrlEncoded("term".into(), "breast cancer".into()),
            ]))
            .with_body("<eSearchResult><IdList><Id>31452104</Id></IdList></eSearchResult>")
            .create_async()
            .await;
        let efetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), "31452104".into()))
            .with_body(EFETCH_XML)
            .create_async()
            .await;

        let records = source(&server.url())
            .search(&SourceQuery::plain("breast cancer", 5))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        esearch.assert_async().await;
        efetch.assert_async().await;
    }

    #[tokio::test]
    async fn test_lookup_unknown_pmid_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _efetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(mockito::Matcher::Any)
            .with_body("<PubmedArticleSet></PubmedArticleSet>")
            .create_async()
            .await;

        let id = Identifier::pmid("99999999").unwrap();
        let err = source(&server.url()).lookup(&id).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
