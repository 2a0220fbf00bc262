// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Captures, Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers. The reason
// is that such a string replacement can be easily implemented without requiring a specific library."
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
// An empty identifier (`$$`) is an escaped dollar sign.
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth|)(?:%0(\d+)d)?\$").unwrap()
});

/// Values substituted into `SegmentTemplate@initialization` and `@media`.
#[derive(Debug, Clone, Default)]
pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl<'a> Template<'a> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'a str, value: String) {
        self.args.insert(key, value);
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }

    /// Whether `template` refers to the identifier `key`, with or without a width.
    pub fn references(template: &str, key: &str) -> bool {
        TEMPLATE_REGEX
            .captures_iter(template)
            .any(|caps| caps.get(1).is_some_and(|m| m.as_str() == key))
    }
}

struct TemplateReplacer<'a, 'b>(&'a HashMap<&'b str, String>);

impl Replacer for TemplateReplacer<'_, '_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if key.is_empty() {
            dst.push('$');
            return;
        }

        let Some(value) = self.0.get(key) else {
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Template;

    #[test]
    fn test_template_replace() {
        let mut template = Template::new();
        template.insert(Template::REPRESENTATION_ID, "1".to_string());
        template.insert(Template::NUMBER, "2".to_string());
        template.insert(Template::TIME, "3".to_string());
        template.insert(Template::BANDWIDTH, "4".to_string());

        assert_eq!(template.resolve("$RepresentationID$"), "1");
        assert_eq!(template.resolve("$Number$"), "2");
        assert_eq!(template.resolve("$Time$"), "3");
        assert_eq!(template.resolve("$Bandwidth$"), "4");

        assert_eq!(template.resolve("$Number%02d$"), "02");
        assert_eq!(template.resolve("$Time%10d$"), "0000000003");

        assert_eq!(
            template.resolve("$RepresentationID%02d$-$Number%09d$"),
            "01-000000002"
        );
        assert_eq!(
            template.resolve("video/$RepresentationID$/seg-$Number$-$Time$.m4s"),
            "video/1/seg-2-3.m4s"
        );

        // Unknown variable
        assert_eq!(template.resolve("$Unknown$"), "$Unknown$");
        // Escaped dollar
        assert_eq!(template.resolve("price$$-$Number$"), "price$-2");
    }

    #[test]
    fn test_template_variable_not_defined() {
        let template = Template::new();
        assert_eq!(
            template.resolve("$RepresentationID$"),
            "$RepresentationID$".to_string()
        );
    }

    #[test]
    fn test_template_references() {
        assert!(Template::references(
            "$RepresentationID$/init.mp4",
            Template::REPRESENTATION_ID
        ));
        assert!(Template::references("seg-$Number%05d$.m4s", Template::NUMBER));
        assert!(!Template::references("seg-$Number$.m4s", Template::TIME));
        assert!(!Template::references("cost$$RepresentationID.m4s", Template::REPRESENTATION_ID));
    }
}
