//! Renders a closed document into a printable HTML artifact.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    jobs::JOB_RENDER_DOCUMENT,
    models::{Document, DocumentTerms, DocumentType, Job},
    schema::{document_terms, document_types, documents},
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub struct RenderDocumentJob;

impl RenderDocumentJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RenderDocumentJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for RenderDocumentJob {
    fn job_type(&self) -> &'static str {
        JOB_RENDER_DOCUMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let Some(document_id) = job
            .payload
            .get("document_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            return JobExecution::Failed {
                error: "payload missing document_id".to_string(),
            };
        };

        let loaded = {
            let mut conn = match state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(10),
                        error: format!("database pool: {err:?}"),
                    }
                }
            };
            load_render_inputs(&mut conn, document_id)
        };
        let (document, doc_type, terms) = match loaded {
            Ok(Some(inputs)) => inputs,
            // A deleted document makes the job moot, not broken.
            Ok(None) => return JobExecution::Success,
            Err(err) => {
                return JobExecution::Retry {
                    delay: Duration::from_secs(10),
                    error: format!("load failed: {err}"),
                }
            }
        };

        let html = render_html(&document, &doc_type, terms.as_ref());
        let key = format!("renders/{document_id}.html");
        match state.storage.put_object(&key, html.into_bytes()).await {
            Ok(()) => JobExecution::Success,
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(30),
                error: format!("storage write failed: {err}"),
            },
        }
    }
}

type RenderInputs = (Document, DocumentType, Option<DocumentTerms>);

fn load_render_inputs(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> Result<Option<RenderInputs>, diesel::result::Error> {
    let document: Option<Document> = documents::table
        .find(document_id)
        .first(conn)
        .optional()?;
    let Some(document) = document else {
        return Ok(None);
    };
    let doc_type: DocumentType = document_types::table
        .find(document.doc_type_id)
        .first(conn)?;
    let terms: Option<DocumentTerms> = match doc_type.terms_id {
        Some(terms_id) => document_terms::table.find(terms_id).first(conn).optional()?,
        None => None,
    };
    Ok(Some((document, doc_type, terms)))
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_html(
    document: &Document,
    doc_type: &DocumentType,
    terms: Option<&DocumentTerms>,
) -> String {
    let mut out = String::new();
    out.push_str("<!doctype html>\n<html><head><meta charset=\"utf-8\">");
    out.push_str(&format!(
        "<title>{} {}</title></head><body>\n",
        escape_html(&doc_type.name),
        escape_html(&document.number)
    ));
    out.push_str(&format!(
        "<h1>{} <small>{}</small></h1>\n",
        escape_html(&doc_type.name),
        escape_html(&document.number)
    ));

    out.push_str("<table>\n");
    if let Value::Object(fields) = &document.data {
        for (name, value) in fields {
            if name == crate::forms::MATERIALS_KEY {
                continue;
            }
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!(
                "<tr><th>{}</th><td>{}</td></tr>\n",
                escape_html(name),
                escape_html(&rendered)
            ));
        }
    }
    out.push_str("</table>\n");

    if let Some(Value::Array(rows)) = document.data.get(crate::forms::MATERIALS_KEY) {
        if !rows.is_empty() {
            out.push_str("<h2>Materials</h2>\n<table>\n<tr><th>Name</th><th>Qty</th><th>Unit</th><th>Notes</th></tr>\n");
            for row in rows {
                let cell = |field: &str| {
                    row.get(field)
                        .and_then(Value::as_str)
                        .map(escape_html)
                        .unwrap_or_default()
                };
                out.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    cell("name"),
                    cell("qty"),
                    cell("unit"),
                    cell("notes")
                ));
            }
            out.push_str("</table>\n");
        }
    }

    if let Some(terms) = terms {
        out.push_str(&format!(
            "<hr><h2>{}</h2>\n{}\n",
            escape_html(&terms.title),
            terms.body_html
        ));
    }

    out.push_str("</body></html>\n");
    out
}
