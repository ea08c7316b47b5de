//! HTTP feed retrieval and XML-to-record parsing.
//!
//! Feeds arrive as flat XML: a root wrapper whose direct children are the
//! records. Each record element becomes a [`Record`] holding a JSON value:
//! child elements become fields, attributes become `@`-prefixed keys,
//! element text lands either as the field value or under `$text` when
//! attributes are present, and a repeated child name becomes an array.
//!
//! The items feed is required and any failure there aborts the run. The
//! auxiliary feeds (images, series, attributes, features) degrade to empty
//! lookup tables; they use fixed field names: `code`, plus `url`/`order`
//! for images and `name` for the dictionaries.

use std::collections::HashMap;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::canonical::TEXT_KEY;
use crate::config::FeedEndpoints;
use crate::error::{Result, SyncError};
use crate::record::Record;

/// One image reference from the images feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub url: String,
    pub order: i32,
}

/// Lookup tables built from the auxiliary feeds.
#[derive(Debug, Clone, Default)]
pub struct AuxData {
    /// Item key to its gallery, unsorted as fetched.
    pub images: HashMap<String, Vec<ImageRef>>,
    /// Series code to display name.
    pub series: HashMap<String, String>,
    /// Attribute code to display name.
    pub attributes: HashMap<String, String>,
    /// Feature code to display label.
    pub features: HashMap<String, String>,
}

/// HTTP client for the feed endpoints.
///
/// A single timeout covers every call made through it.
pub struct FeedClient {
    http: reqwest::Client,
}

impl FeedClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// The underlying client, for collaborators that fetch non-feed
    /// resources with the same timeout.
    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    /// Fetch and parse one XML feed.
    ///
    /// An empty body is an error, not an empty feed.
    pub async fn fetch_records(&self, url: &str, feed: &str) -> Result<Vec<Record>> {
        debug!(feed, url, "fetching feed");
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;

        if body.trim().is_empty() {
            return Err(SyncError::EmptyFeed {
                feed: feed.to_string(),
            });
        }

        let records = parse_records(&body, feed)?;
        debug!(feed, count = records.len(), "parsed feed");
        Ok(records)
    }

    /// Fetch every auxiliary feed, degrading to empty tables on failure.
    pub async fn fetch_aux(&self, endpoints: &FeedEndpoints) -> AuxData {
        AuxData {
            images: images_from(&self.aux_records(&endpoints.images, "images").await),
            series: dictionary_from(&self.aux_records(&endpoints.series, "series").await),
            attributes: dictionary_from(
                &self.aux_records(&endpoints.attributes, "attributes").await,
            ),
            features: dictionary_from(&self.aux_records(&endpoints.features, "features").await),
        }
    }

    async fn aux_records(&self, url: &str, feed: &str) -> Vec<Record> {
        if url.trim().is_empty() {
            debug!(feed, "auxiliary feed not configured");
            return Vec::new();
        }
        match self.fetch_records(url, feed).await {
            Ok(records) => records,
            Err(e) => {
                warn!(feed, error = %e, "auxiliary feed unavailable, continuing without it");
                Vec::new()
            }
        }
    }
}

/// Build the code-to-name table of a dictionary feed.
fn dictionary_from(records: &[Record]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for record in records {
        let (Some(code), Some(name)) = (record.text("code"), record.text("name")) else {
            continue;
        };
        map.insert(code, name);
    }
    map
}

/// Group image references by item code.
fn images_from(records: &[Record]) -> HashMap<String, Vec<ImageRef>> {
    let mut map: HashMap<String, Vec<ImageRef>> = HashMap::new();
    for record in records {
        let (Some(code), Some(url)) = (record.text("code"), record.text("url")) else {
            continue;
        };
        let order = record
            .text("order")
            .and_then(|o| o.parse().ok())
            .unwrap_or(0);
        map.entry(code).or_default().push(ImageRef { url, order });
    }
    map
}

// ===== XML parsing =====

/// An element being assembled while its subtree is read.
struct Frame {
    name: String,
    map: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(e: &BytesStart, feed: &str) -> Result<Self> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

        let mut map = Map::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| parse_error(feed, err))?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.local_name().as_ref()));
            let value = attr
                .unescape_value()
                .map_err(|err| parse_error(feed, err))?;
            map.insert(key, Value::String(value.into_owned()));
        }

        Ok(Self {
            name,
            map,
            text: String::new(),
        })
    }

    /// Collapse the finished element into its name and JSON value.
    fn finish(self) -> (String, Value) {
        let Frame { name, mut map, text } = self;
        let text = text.trim();

        if map.is_empty() {
            return (name, Value::String(text.to_string()));
        }
        if !text.is_empty() {
            map.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        (name, Value::Object(map))
    }
}

/// Parse a whole feed document into its records.
///
/// The root element is a wrapper; each direct child becomes one record.
pub fn parse_records(xml: &str, feed: &str) -> Result<Vec<Record>> {
    let mut reader = Reader::from_str(xml);
    let mut records = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Frame::open(&e, feed)?),
            Ok(Event::Empty(e)) => {
                let frame = Frame::open(&e, feed)?;
                close_frame(frame, &mut stack, &mut records);
            }
            Ok(Event::Text(t)) => {
                if let Some(frame) = stack.last_mut() {
                    let text = t.decode().map_err(|err| parse_error(feed, err))?;
                    frame.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(frame) = stack.last_mut() {
                    let resolved = r.resolve_char_ref().map_err(|err| parse_error(feed, err))?;
                    match resolved {
                        Some(ch) => frame.text.push(ch),
                        None => frame.text.push(named_entity(&r, feed)?),
                    }
                }
            }
            Ok(Event::End(_)) => match stack.pop() {
                Some(frame) => close_frame(frame, &mut stack, &mut records),
                None => return Err(parse_error(feed, "unexpected closing tag")),
            },
            Ok(Event::Eof) => break,
            Ok(_) => {} // declarations, comments, processing instructions
            Err(e) => return Err(parse_error(feed, e)),
        }
    }

    if !stack.is_empty() {
        return Err(parse_error(feed, "unclosed element at end of document"));
    }

    Ok(records)
}

/// Attach a finished element to its parent, or emit it as a record when the
/// parent is the root wrapper.
fn close_frame(frame: Frame, stack: &mut Vec<Frame>, records: &mut Vec<Record>) {
    let (name, value) = frame.finish();
    match stack.len() {
        0 => {} // the root wrapper itself
        1 => records.push(Record::new(value)),
        _ => {
            if let Some(parent) = stack.last_mut() {
                attach(&mut parent.map, name, value);
            }
        }
    }
}

/// Insert a child value, promoting to an array when the name repeats.
fn attach(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

/// Resolve the five predefined XML entities.
fn named_entity(raw: &[u8], feed: &str) -> Result<char> {
    match raw {
        b"amp" => Ok('&'),
        b"lt" => Ok('<'),
        b"gt" => Ok('>'),
        b"quot" => Ok('"'),
        b"apos" => Ok('\''),
        other => Err(parse_error(
            feed,
            format!("unknown entity '&{};'", String::from_utf8_lossy(other)),
        )),
    }
}

fn parse_error(feed: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::FeedParse {
        feed: feed.to_string(),
        reason: err.to_string(),
    }
}
