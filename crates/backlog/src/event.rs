//! Projection of a processed backlog item onto the outbound release event.

use changewire_core::{BacklogItem, EventTag, ReleaseEvent, ReleasePayload};

/// Build the event for an enriched release. Absent lists render empty.
pub fn release_event(item: &BacklogItem) -> ReleaseEvent {
    let release = &item.release;
    ReleaseEvent::new(ReleasePayload {
        tech_stack_name: item.tech_stack_name.clone(),
        version: release.version.clone(),
        title: release.title.clone(),
        content: release.content.clone(),
        content_translated: release.content_translated.clone(),
        short_summary: release.short_summary.clone(),
        insights: release.insights.clone().unwrap_or_default(),
        migration_guide: release.migration_guide.clone(),
        technical_keywords: release.technical_keywords.clone().unwrap_or_default(),
        published_at: release.published_at,
        source_url: release.source_url.clone(),
        tags: item.tags.iter().copied().map(EventTag::auto).collect(),
    })
}

#[cfg(test)]
mod tests {
    use changewire_core::{
        BacklogEntry, BacklogStatus, InsightItem, ReleaseRecord, ReleaseTagKind, AUTO_TAG_REASON,
    };
    use chrono::Utc;

    use super::*;

    fn item() -> BacklogItem {
        let now = Utc::now();
        BacklogItem {
            entry: BacklogEntry {
                id: 10,
                release_id: 3,
                status: BacklogStatus::Processing,
                retry_count: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
            release: ReleaseRecord {
                id: 3,
                tech_stack_id: 1,
                version: "5.0.0".into(),
                title: "Webpack 5".into(),
                content: "Breaking: Node 10 dropped".into(),
                content_translated: Some("번역".into()),
                short_summary: Some("요약".into()),
                insights: None,
                migration_guide: None,
                technical_keywords: None,
                published_at: None,
                source_url: Some("https://github.com/webpack/webpack/releases/tag/v5.0.0".into()),
                created_at: now,
            },
            tech_stack_name: "Webpack".into(),
            tags: vec![ReleaseTagKind::Breaking],
        }
    }

    #[test]
    fn test_absent_lists_render_empty() {
        let event = release_event(&item());
        assert_eq!(event.key(), "Webpack");
        assert!(event.payload.insights.is_empty());
        assert!(event.payload.technical_keywords.is_empty());
        assert_eq!(event.payload.content_translated.as_deref(), Some("번역"));
        assert_eq!(event.payload.tags.len(), 1);
        assert_eq!(event.payload.tags[0].kind, ReleaseTagKind::Breaking);
        assert_eq!(event.payload.tags[0].reason, AUTO_TAG_REASON);
    }

    #[test]
    fn test_insights_carried_over() {
        let mut item = item();
        item.release.insights = Some(vec![InsightItem {
            kind: "BREAKING".into(),
            title: "Node 10".into(),
            reason: "Minimum Node version raised".into(),
        }]);
        item.release.technical_keywords = Some(vec!["node".into()]);

        let event = release_event(&item);
        assert_eq!(event.payload.insights[0].title, "Node 10");
        assert_eq!(event.payload.technical_keywords, vec!["node".to_string()]);

        let json = serde_json_value(&event);
        assert_eq!(json["payload"]["tags"][0]["type"], "BREAKING");
        assert_eq!(json["payload"]["techStackName"], "Webpack");
        assert!(json["payload"]["migrationGuide"].is_null());
    }

    fn serde_json_value(event: &ReleaseEvent) -> serde_json::Value {
        serde_json::to_value(event).unwrap()
    }
}
