//! Optional expression evaluation for tags carrying a filter pipeline, e.g.
//! `%%title | upper%%` or `%%nickname | default:'anonymous'%%`.

use serde_json::Value;

use crate::error::TemplateIssue;
use crate::module::{ModuleContext, Replacement, RenderModule};

pub struct ExpressionsModule;

impl RenderModule for ExpressionsModule {
    fn name(&self) -> &'static str {
        "expressions"
    }

    fn claims(&self, tag: &str) -> bool {
        tag.contains('|')
    }

    fn data_key<'t>(&self, tag: &'t str) -> &'t str {
        tag.split('|').next().unwrap_or(tag).trim()
    }

    fn resolve(
        &self,
        tag: &str,
        value: Option<&Value>,
        ctx: &mut ModuleContext<'_>,
    ) -> Result<Replacement, TemplateIssue> {
        let mut text = match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(_) => {
                return Err(TemplateIssue::new(
                    ctx.part_name,
                    Some(self.data_key(tag).to_string()),
                    format!("expression `{tag}` resolved to a non-scalar value"),
                ));
            }
        };

        for filter in tag.split('|').skip(1).map(str::trim) {
            match filter {
                "upper" => text = text.to_uppercase(),
                "lower" => text = text.to_lowercase(),
                _ => {
                    if let Some(fallback) = filter.strip_prefix("default:") {
                        if text.is_empty() {
                            text = fallback.trim().trim_matches('\'').to_string();
                        }
                    } else {
                        return Err(TemplateIssue::new(
                            ctx.part_name,
                            Some(self.data_key(tag).to_string()),
                            format!("unknown filter `{filter}` in expression `{tag}`"),
                        ));
                    }
                }
            }
        }

        Ok(Replacement::Text(text))
    }
}
