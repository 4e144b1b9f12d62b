//! Renders analysis results the way the browser front end lays them out.

use medbot_core::{AnalysisResponse, ImageAnalysisResult, TextAnalysisResult};
use std::fmt::Write;
use std::str::FromStr;

/// Display language of the rendered labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    Ar,
}

pub struct Labels {
    pub image_heading: &'static str,
    pub text_heading: &'static str,
    pub image_alt: &'static str,
}

static EN: Labels = Labels {
    image_heading: "Image Analysis",
    text_heading: "Text Analysis",
    image_alt: "Processed Image",
};

static AR: Labels = Labels {
    image_heading: "تحليل الصورة",
    text_heading: "تحليل النص",
    image_alt: "الصورة المعالجة",
};

impl Locale {
    pub fn labels(self) -> &'static Labels {
        match self {
            Locale::En => &EN,
            Locale::Ar => &AR,
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "ar" => Ok(Locale::Ar),
            other => Err(format!("unsupported language '{other}', expected en or ar")),
        }
    }
}

/// HTML fragment with one `result-item` block per filled slot. Empty slots render nothing.
pub fn html(response: &AnalysisResponse, locale: Locale) -> String {
    let mut out = String::new();
    if let Some(image) = &response.image_analysis {
        out.push_str(&image_html(image, locale));
    }
    if let Some(text) = &response.text_analysis {
        out.push_str(&text_html(text, locale));
    }
    out
}

pub fn image_html(result: &ImageAnalysisResult, locale: Locale) -> String {
    let labels = locale.labels();
    let mut out = format!("<div class=\"result-item\"><h2>{}</h2>", labels.image_heading);
    let _ = write!(out, "<p>{}</p>", escape(result.headline().unwrap_or_default()));
    if let Some(url) = &result.image_url {
        let _ = write!(
            out,
            "<img src=\"{}\" alt=\"{}\" />",
            escape(url),
            labels.image_alt
        );
    }
    out.push_str("</div>");
    out
}

pub fn text_html(result: &TextAnalysisResult, locale: Locale) -> String {
    let mut out = format!(
        "<div class=\"result-item\"><h2>{}</h2>",
        locale.labels().text_heading
    );
    for (key, value) in result.entries() {
        let _ = write!(
            out,
            "<p><strong>{}:</strong> {}</p>",
            escape(key),
            escape(value)
        );
    }
    out.push_str("</div>");
    out
}

/// Terminal rendering of the same two sections.
pub fn plain(response: &AnalysisResponse, locale: Locale) -> String {
    let labels = locale.labels();
    let mut sections = Vec::new();
    if let Some(image) = &response.image_analysis {
        let mut section = format!(
            "{}\n  {}",
            labels.image_heading,
            image.headline().unwrap_or_default()
        );
        for (label, probability) in &image.predictions {
            let _ = write!(section, "\n  {label}: {probability:.3}");
        }
        if let Some(url) = &image.image_url {
            let _ = write!(section, "\n  image: {url}");
        }
        sections.push(section);
    }
    if let Some(text) = &response.text_analysis {
        let mut section = labels.text_heading.to_string();
        for (key, value) in text.entries() {
            let _ = write!(section, "\n  {key}: {value}");
        }
        sections.push(section);
    }
    sections.join("\n\n")
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
