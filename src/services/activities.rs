use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::models::event::{Activity, Image};
use crate::services::generator::GeneratorBoxFuture;

#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySearch {
    pub query: String,
    pub activities: Vec<Activity>,
    pub total_count: usize,
    pub images: Vec<(u64, Vec<Image>)>,
}

/// Looks up activities for a chat query. `Ok(None)` means nothing to attach.
pub trait ActivityFinder: Send + Sync {
    fn find<'a>(
        &'a self,
        query: &'a str,
    ) -> GeneratorBoxFuture<'a, Result<Option<ActivitySearch>, String>>;
}

#[derive(Debug, Default, Clone)]
pub struct NoActivityFinder;

impl ActivityFinder for NoActivityFinder {
    fn find<'a>(
        &'a self,
        _query: &'a str,
    ) -> GeneratorBoxFuture<'a, Result<Option<ActivitySearch>, String>> {
        Box::pin(async { Ok::<Option<ActivitySearch>, String>(None) })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(flatten)]
    activity: Activity,
    #[serde(default)]
    images: Vec<Image>,
}

const MIN_TERM_LEN: usize = 3;
const MAX_RESULTS: usize = 5;

/// In-memory activity catalog loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct CatalogActivityFinder {
    activities: Vec<Activity>,
    images: HashMap<u64, Vec<Image>>,
}

impl CatalogActivityFinder {
    pub fn new(activities: Vec<Activity>, images: Vec<Image>) -> Self {
        let mut by_activity: HashMap<u64, Vec<Image>> = HashMap::new();
        for image in images {
            by_activity.entry(image.activity_id).or_default().push(image);
        }
        Self {
            activities,
            images: by_activity,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, String> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(raw).map_err(|e| format!("invalid activity catalog: {e}"))?;
        let mut activities = Vec::with_capacity(entries.len());
        let mut images = Vec::new();
        for entry in entries {
            images.extend(entry.images);
            activities.push(entry.activity);
        }
        Ok(Self::new(activities, images))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read activity catalog {} failed: {e}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn search(&self, query: &str) -> Option<ActivitySearch> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= MIN_TERM_LEN)
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return None;
        }

        let matches: Vec<&Activity> = self
            .activities
            .iter()
            .filter(|activity| {
                let haystack = format!(
                    "{} {} {}",
                    activity.name, activity.category, activity.description
                )
                .to_lowercase();
                terms.iter().any(|term| haystack.contains(term.as_str()))
            })
            .collect();
        if matches.is_empty() {
            return None;
        }

        let total_count = matches.len();
        let activities: Vec<Activity> = matches.into_iter().take(MAX_RESULTS).cloned().collect();
        let images = activities
            .iter()
            .filter_map(|a| {
                self.images
                    .get(&a.id)
                    .filter(|imgs| !imgs.is_empty())
                    .map(|imgs| (a.id, imgs.clone()))
            })
            .collect();

        Some(ActivitySearch {
            query: query.to_string(),
            activities,
            total_count,
            images,
        })
    }
}

impl ActivityFinder for CatalogActivityFinder {
    fn find<'a>(
        &'a self,
        query: &'a str,
    ) -> GeneratorBoxFuture<'a, Result<Option<ActivitySearch>, String>> {
        Box::pin(async move { Ok::<Option<ActivitySearch>, String>(self.search(query)) })
    }
}
