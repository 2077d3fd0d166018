//! Email template repository with a short in-process cache
//!
//! Templates change rarely; a 5-minute cache keeps the render path off the
//! database. Locale-specific lookups fall back to the base slug.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub slug: String,
    pub name: String,
    pub category: String,
    pub subject: String,
    pub html_content: String,
    pub text_content: Option<String>,
    /// Variable names the template expects.
    pub variables: Vec<String>,
    pub is_active: bool,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Substitute `{{name}}` placeholders. Unknown variables in the rendered
    /// text are a caller error; missing values render as empty.
    pub fn render(&self, values: &HashMap<String, String>) -> (String, String, Option<String>) {
        let substitute = |text: &str| {
            let mut out = text.to_string();
            for (key, value) in values {
                out = out.replace(&format!("{{{{{}}}}}", key), value);
            }
            out
        };
        (
            substitute(&self.subject),
            substitute(&self.html_content),
            self.text_content.as_deref().map(substitute),
        )
    }

    /// Variables referenced by the template but absent from `values`.
    pub fn missing_variables(&self, values: &HashMap<String, String>) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| !values.contains_key(*v))
            .cloned()
            .collect()
    }
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fetch an active template, trying "slug_locale" before "slug".
    async fn get(&self, slug: &str, locale: Option<&str>) -> Result<Option<Template>>;
}

struct CachedTemplate {
    template: Option<Template>,
    fetched_at: Instant,
}

pub struct PgTemplates {
    pool: PgPool,
    cache: RwLock<HashMap<String, CachedTemplate>>,
}

impl PgTemplates {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_get(&self, key: &str) -> Option<Option<Template>> {
        let cache = self.cache.read();
        cache.get(key).and_then(|entry| {
            if entry.fetched_at.elapsed() < TEMPLATE_CACHE_TTL {
                Some(entry.template.clone())
            } else {
                None
            }
        })
    }

    fn cache_put(&self, key: String, template: Option<Template>) {
        self.cache.write().insert(
            key,
            CachedTemplate {
                template,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn fetch(&self, slug: &str) -> Result<Option<Template>> {
        let row = sqlx::query(
            "SELECT slug, name, category, subject, html_content, text_content, variables, is_active, version, updated_at \
             FROM email_templates WHERE slug = $1 AND is_active",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let variables: serde_json::Value = row.get("variables");
                Ok(Some(Template {
                    slug: row.get("slug"),
                    name: row.get("name"),
                    category: row.get("category"),
                    subject: row.get("subject"),
                    html_content: row.get("html_content"),
                    text_content: row.try_get("text_content").ok().flatten(),
                    variables: serde_json::from_value(variables).unwrap_or_default(),
                    is_active: row.get("is_active"),
                    version: row.get("version"),
                    updated_at: row.get("updated_at"),
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplates {
    async fn get(&self, slug: &str, locale: Option<&str>) -> Result<Option<Template>> {
        let candidates: Vec<String> = match locale {
            Some(locale) => vec![format!("{}_{}", slug, locale), slug.to_string()],
            None => vec![slug.to_string()],
        };

        for candidate in candidates {
            if let Some(cached) = self.cache_get(&candidate) {
                if cached.is_some() {
                    return Ok(cached);
                }
                continue;
            }
            let fetched = self.fetch(&candidate).await?;
            self.cache_put(candidate.clone(), fetched.clone());
            if fetched.is_some() {
                debug!(slug = %candidate, "Template loaded");
                return Ok(fetched);
            }
        }
        Ok(None)
    }
}
