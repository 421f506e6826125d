//! RSS 2.0 rendering for topic results.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use minijinja::{context, Environment};
use serde::Serialize;

use herald_scheduler::format_local;
use herald_store::FeedItem;

const FEED_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>{{ title }}</title>
    <link>{{ link }}</link>
    <description>{{ description }}</description>
    <lastBuildDate>{{ build_date }}</lastBuildDate>
    <generator>herald</generator>
{%- for item in items %}
    <item>
      <title>{{ item.title }}</title>
      <link>{{ item.link }}</link>
      <guid isPermaLink="true">{{ item.link }}</guid>
      <description>{{ item.description }}</description>
      <pubDate>{{ item.pub_date }}</pubDate>
    </item>
{%- endfor %}
  </channel>
</rss>
"#;

/// Channel-level metadata for one feed.
pub struct Channel {
    pub title: String,
    pub description: String,
    pub link: String,
}

#[derive(Serialize)]
struct RenderedItem {
    title: String,
    link: String,
    description: String,
    pub_date: String,
}

/// Renders feeds from a compiled template. The `.xml` name turns on
/// autoescaping, so result content cannot break the document.
pub struct FeedRenderer {
    env: Environment<'static>,
    host: String,
    tz: Tz,
}

impl FeedRenderer {
    pub fn new(host: &str, tz: Tz) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("feed.xml", FEED_TEMPLATE)?;
        Ok(Self {
            env,
            host: host.trim_end_matches('/').to_string(),
            tz,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Items are expected newest first, as the store returns them.
    pub fn render(
        &self,
        channel: &Channel,
        items: &[FeedItem],
        now: DateTime<Utc>,
    ) -> Result<String, minijinja::Error> {
        let items: Vec<RenderedItem> = items
            .iter()
            .map(|item| RenderedItem {
                title: format!(
                    "{} - {} ({})",
                    item.task_name,
                    format_local(item.created_at, self.tz),
                    self.tz
                ),
                link: format!("{}/result/{}", self.host, item.id),
                description: item.content.clone(),
                pub_date: item.created_at.to_rfc2822(),
            })
            .collect();

        self.env.get_template("feed.xml")?.render(context! {
            title => channel.title,
            description => channel.description,
            link => channel.link,
            build_date => now.to_rfc2822(),
            items => items,
        })
    }
}
