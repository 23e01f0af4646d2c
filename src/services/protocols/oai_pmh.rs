// src/services/protocols/oai_pmh.rs

//! OAI-PMH listing protocol.
//!
//! Pages through `ListRecords` with resumption tokens. With
//! `params.list_identifiers = true` it pages through `ListIdentifiers`
//! instead and fetches each record with `GetRecord`.

use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{AppError, Result};
use crate::models::record::XML;
use crate::models::{RawRecord, SourceDefinition};
use crate::services::extractor::{Cursor, CursorProtocol, Entry, Page};
use crate::services::fetch::{FetchedPage, PageRequest};
use crate::utils::with_query;

const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// OAI-PMH harvesting over one repository endpoint.
#[derive(Debug, Clone)]
pub struct OaiPmh {
    base_url: String,
    metadata_prefix: String,
    set: Option<String>,
    from: Option<String>,
    until: Option<String>,
    list_identifiers: bool,
}

impl OaiPmh {
    pub fn from_source(source: &SourceDefinition) -> Result<Self> {
        if source.base_url.is_empty() {
            return Err(AppError::config(format!(
                "source {} needs a base_url for oai_pmh",
                source.id
            )));
        }
        Ok(Self {
            base_url: source.base_url.clone(),
            metadata_prefix: source
                .param_str("metadata_prefix")
                .unwrap_or("oai_dc")
                .to_string(),
            set: source.param_str("set").map(str::to_string),
            from: source.param_str("from").map(str::to_string),
            until: source.param_str("until").map(str::to_string),
            list_identifiers: source.param_bool("list_identifiers").unwrap_or(false),
        })
    }

    fn verb(&self) -> &'static str {
        if self.list_identifiers {
            "ListIdentifiers"
        } else {
            "ListRecords"
        }
    }
}

impl CursorProtocol for OaiPmh {
    fn name(&self) -> &'static str {
        "oai_pmh"
    }

    fn first_page(&self) -> Result<PageRequest> {
        let mut pairs = vec![
            ("verb", self.verb()),
            ("metadataPrefix", self.metadata_prefix.as_str()),
        ];
        for (key, value) in [("set", &self.set), ("from", &self.from), ("until", &self.until)] {
            if let Some(value) = value {
                pairs.push((key, value.as_str()));
            }
        }
        Ok(PageRequest::new(with_query(&self.base_url, pairs)?))
    }

    fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
        match cursor {
            Cursor::Token(token) => Ok(PageRequest::new(with_query(
                &self.base_url,
                [("verb", self.verb()), ("resumptionToken", token.as_str())],
            )?)),
            other => Err(AppError::validation(format!(
                "oai_pmh cannot page with {other:?}"
            ))),
        }
    }

    fn parse_page(&self, page: &FetchedPage, _cursor: Option<&Cursor>) -> Result<Page> {
        let response = OaiResponse::parse(&page.body)?;
        if let Some((code, message)) = response.error {
            if code == NO_RECORDS_MATCH {
                return Ok(Page::default());
            }
            return Err(AppError::permanent(
                &self.base_url,
                format!("OAI-PMH error {code}: {message}"),
            ));
        }

        let entries: Vec<Entry> = if self.list_identifiers {
            response
                .headers
                .into_iter()
                .filter(|h| !h.deleted && !h.identifier.is_empty())
                .map(|h| Entry::Reference(h.identifier))
                .collect()
        } else {
            response
                .records
                .into_iter()
                .filter(|r| !r.header.deleted)
                .map(|r| Entry::Record(RawRecord::xml(r.xml)))
                .collect()
        };

        Ok(Page {
            entries,
            next: response.resumption_token.map(Cursor::Token),
            total_hint: response.complete_list_size,
        })
    }

    fn record_request(&self, id: &str) -> Result<PageRequest> {
        Ok(PageRequest::new(with_query(
            &self.base_url,
            [
                ("verb", "GetRecord"),
                ("identifier", id),
                ("metadataPrefix", self.metadata_prefix.as_str()),
            ],
        )?))
    }

    fn parse_record(&self, id: &str, page: FetchedPage) -> Result<Option<RawRecord>> {
        let response = OaiResponse::parse(&page.body)?;
        if let Some((code, message)) = response.error {
            return Err(AppError::permanent(
                id,
                format!("OAI-PMH error {code}: {message}"),
            ));
        }
        match response.records.into_iter().next() {
            Some(record) if record.header.deleted => Ok(None),
            Some(record) => Ok(Some(RawRecord::xml(record.xml))),
            None => Err(AppError::permanent(id, "GetRecord response has no record")),
        }
    }
}

#[derive(Debug, Default)]
struct OaiHeader {
    identifier: String,
    deleted: bool,
}

#[derive(Debug)]
struct OaiRecord {
    header: OaiHeader,
    xml: Vec<u8>,
}

#[derive(Debug, Default)]
struct OaiResponse {
    records: Vec<OaiRecord>,
    /// Headers outside `<record>`, as listed by `ListIdentifiers`
    headers: Vec<OaiHeader>,
    resumption_token: Option<String>,
    complete_list_size: Option<u64>,
    error: Option<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Identifier,
    Token,
    Error,
}

fn xml_error(e: impl std::fmt::Display) -> AppError {
    AppError::deserialization(XML, e)
}

fn attribute(start: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

impl OaiResponse {
    /// Scan an OAI-PMH response, copying each `<record>` subtree verbatim.
    fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(body);
        let mut buf = Vec::new();
        let mut response = Self::default();

        let mut depth = 0usize;
        let mut record: Option<(Writer<Vec<u8>>, usize)> = None;
        let mut header: Option<OaiHeader> = None;
        let mut in_header = false;
        let mut capture: Option<Capture> = None;
        let mut text = String::new();
        let mut error_code = String::new();

        loop {
            buf.clear();
            let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
            if let Some((writer, _)) = record.as_mut() {
                if !matches!(event, Event::Eof) {
                    writer.write_event(event.clone()).map_err(xml_error)?;
                }
            }

            match &event {
                Event::Start(start) => {
                    depth += 1;
                    match start.local_name().as_ref() {
                        b"record" if record.is_none() => {
                            let mut writer = Writer::new(Vec::new());
                            writer.write_event(event.clone()).map_err(xml_error)?;
                            record = Some((writer, depth));
                        }
                        b"header" => {
                            in_header = true;
                            header = Some(OaiHeader {
                                identifier: String::new(),
                                deleted: attribute(start, b"status")?.as_deref() == Some("deleted"),
                            });
                        }
                        b"identifier" if in_header => {
                            capture = Some(Capture::Identifier);
                            text.clear();
                        }
                        b"resumptionToken" => {
                            response.complete_list_size = attribute(start, b"completeListSize")?
                                .and_then(|s| s.trim().parse().ok());
                            capture = Some(Capture::Token);
                            text.clear();
                        }
                        b"error" => {
                            error_code = attribute(start, b"code")?.unwrap_or_default();
                            capture = Some(Capture::Error);
                            text.clear();
                        }
                        _ => {}
                    }
                }
                Event::Empty(start) => match start.local_name().as_ref() {
                    // An empty token marks the last page of a list.
                    b"resumptionToken" => {
                        response.complete_list_size = attribute(start, b"completeListSize")?
                            .and_then(|s| s.trim().parse().ok());
                    }
                    b"error" => {
                        let code = attribute(start, b"code")?.unwrap_or_default();
                        response.error = Some((code, String::new()));
                    }
                    _ => {}
                },
                Event::Text(t) if capture.is_some() => {
                    text.push_str(&t.unescape().map_err(xml_error)?);
                }
                Event::CData(data) if capture.is_some() => {
                    text.push_str(&String::from_utf8_lossy(data));
                }
                Event::End(end) => {
                    match end.local_name().as_ref() {
                        b"identifier" if capture == Some(Capture::Identifier) => {
                            if let Some(h) = header.as_mut() {
                                h.identifier = text.trim().to_string();
                            }
                            capture = None;
                        }
                        b"resumptionToken" => {
                            let token = text.trim();
                            if !token.is_empty() {
                                response.resumption_token = Some(token.to_string());
                            }
                            capture = None;
                        }
                        b"error" => {
                            let code = std::mem::take(&mut error_code);
                            response.error = Some((code, text.trim().to_string()));
                            capture = None;
                        }
                        b"header" if in_header => {
                            in_header = false;
                            if record.is_none() {
                                if let Some(h) = header.take() {
                                    response.headers.push(h);
                                }
                            }
                        }
                        b"record" if record.as_ref().is_some_and(|(_, d)| *d == depth) => {
                            if let Some((writer, _)) = record.take() {
                                response.records.push(OaiRecord {
                                    header: header.take().unwrap_or_default(),
                                    xml: writer.into_inner(),
                                });
                            }
                        }
                        _ => {}
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::services::extractor::tests::FakeFetcher;
    use crate::services::extractor::{Extractor, RetryPolicy};
    use crate::utils::xml;

    fn source(list_identifiers: bool) -> SourceDefinition {
        toml::from_str(&format!(
            r#"
id = "museum_x"
extractor = "oai_pmh"
index_name = "museum_x"
base_url = "http://museum.example/oai"

[params]
metadata_prefix = "oai_dc"
set = "paintings"
list_identifiers = {list_identifiers}
"#
        ))
        .unwrap()
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            content_type: Some("text/xml".into()),
            body: body.as_bytes().to_vec(),
        }
    }

    const FIRST_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <ListRecords>
    <record>
      <header><identifier>oai:museum:1</identifier></header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:identifier>obj-1</dc:identifier>
          <dc:title>De Nachtwacht</dc:title>
        </oai_dc:dc>
      </metadata>
    </record>
    <record>
      <header status="deleted"><identifier>oai:museum:2</identifier></header>
    </record>
    <resumptionToken completeListSize="3" cursor="0">token-1</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    const LAST_PAGE: &str = r#"<OAI-PMH>
  <ListRecords>
    <record>
      <header><identifier>oai:museum:3</identifier></header>
      <metadata><dc><title>Het Melkmeisje</title></dc></metadata>
    </record>
    <resumptionToken completeListSize="3" cursor="2"/>
  </ListRecords>
</OAI-PMH>"#;

    #[test]
    fn test_first_page_request() {
        let protocol = OaiPmh::from_source(&source(false)).unwrap();
        assert_eq!(
            protocol.first_page().unwrap().location,
            "http://museum.example/oai?verb=ListRecords&metadataPrefix=oai_dc&set=paintings"
        );
        assert_eq!(
            protocol
                .next_page(&Cursor::Token("a b".into()))
                .unwrap()
                .location,
            "http://museum.example/oai?verb=ListRecords&resumptionToken=a+b"
        );
    }

    #[test]
    fn test_parse_list_records() {
        let protocol = OaiPmh::from_source(&source(false)).unwrap();
        let parsed = protocol.parse_page(&page(FIRST_PAGE), None).unwrap();

        assert_eq!(parsed.total_hint, Some(3));
        assert_eq!(parsed.next, Some(Cursor::Token("token-1".into())));
        // The deleted record is dropped.
        assert_eq!(parsed.entries.len(), 1);

        let Entry::Record(record) = &parsed.entries[0] else {
            panic!("expected an embedded record");
        };
        assert_eq!(record.content_type, XML);
        let tree = xml::to_json(&record.payload).unwrap();
        assert_eq!(
            tree.pointer("/record/header/identifier").and_then(xml::text_of),
            Some("oai:museum:1")
        );
        assert_eq!(
            tree.pointer("/record/metadata/dc/title").and_then(xml::text_of),
            Some("De Nachtwacht")
        );
    }

    #[test]
    fn test_last_page_has_no_token() {
        let protocol = OaiPmh::from_source(&source(false)).unwrap();
        let parsed = protocol.parse_page(&page(LAST_PAGE), None).unwrap();
        assert_eq!(parsed.next, None);
        assert_eq!(parsed.entries.len(), 1);
    }

    #[test]
    fn test_no_records_match_is_empty() {
        let protocol = OaiPmh::from_source(&source(false)).unwrap();
        let parsed = protocol
            .parse_page(
                &page(r#"<OAI-PMH><error code="noRecordsMatch">nothing</error></OAI-PMH>"#),
                None,
            )
            .unwrap();
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.next, None);
    }

    #[test]
    fn test_protocol_error_is_permanent() {
        let protocol = OaiPmh::from_source(&source(false)).unwrap();
        let err = protocol
            .parse_page(
                &page(r#"<OAI-PMH><error code="badResumptionToken">expired</error></OAI-PMH>"#),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, AppError::PermanentSource { .. }));
        assert!(err.to_string().contains("badResumptionToken"));
    }

    #[tokio::test]
    async fn test_list_identifiers_with_get_record() {
        let protocol = OaiPmh::from_source(&source(true)).unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page(
            &protocol.first_page().unwrap().location,
            r#"<OAI-PMH><ListIdentifiers>
                 <header><identifier>oai:museum:1</identifier></header>
                 <header status="deleted"><identifier>oai:museum:2</identifier></header>
                 <header><identifier>oai:museum:3</identifier></header>
               </ListIdentifiers></OAI-PMH>"#,
        );
        fetcher.page(
            &protocol.record_request("oai:museum:1").unwrap().location,
            r#"<OAI-PMH><GetRecord><record>
                 <header><identifier>oai:museum:1</identifier></header>
                 <metadata><dc><title>One</title></dc></metadata>
               </record></GetRecord></OAI-PMH>"#,
        );
        fetcher.page(
            &protocol.record_request("oai:museum:3").unwrap().location,
            r#"<OAI-PMH><error code="idDoesNotExist">gone</error></OAI-PMH>"#,
        );

        let extractor = Extractor::new(
            Arc::new(protocol),
            fetcher.clone(),
            RetryPolicy {
                max_retries: 10,
                unit: Duration::from_secs(1),
            },
        );
        let mut harvest = extractor.run(&source(true));
        let mut titles = Vec::new();
        while let Some(record) = harvest.next_record().await.unwrap() {
            let tree = xml::to_json(&record.payload).unwrap();
            titles.push(
                tree.pointer("/record/metadata/dc/title")
                    .and_then(xml::text_of)
                    .unwrap_or_default()
                    .to_string(),
            );
        }

        assert_eq!(titles, vec!["One"]);
        assert_eq!(harvest.stats().failed_records, 1);
        // Deleted identifiers are never fetched.
        assert_eq!(fetcher.requests().len(), 3);
    }
}
