//! Signed PDF rendering of an approved memo.
//!
//! Layout is computed up front as plain lines so it can be checked without
//! PDFium; [`render`] only places those lines on A4 pages.

use std::panic;

use pdfium_render::prelude::*;

use super::seal::DigitalSeal;

const PAGE_TOP: f32 = 800.0;
const PAGE_BOTTOM: f32 = 56.0;
const MARGIN_LEFT: f32 = 56.0;
const WRAP_COLUMNS: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Banner,
    Heading,
    Label,
    Text,
    Small,
}

impl LineStyle {
    fn size(self) -> f32 {
        match self {
            LineStyle::Banner => 14.0,
            LineStyle::Heading => 16.0,
            LineStyle::Label => 11.0,
            LineStyle::Text => 11.0,
            LineStyle::Small => 8.0,
        }
    }

    fn bold(self) -> bool {
        matches!(self, LineStyle::Banner | LineStyle::Heading | LineStyle::Label)
    }

    fn leading(self) -> f32 {
        self.size() * 1.45
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub style: LineStyle,
    pub text: String,
}

impl Line {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(LineStyle::Text, "")
    }
}

/// Everything printed on the signed copy.
#[derive(Debug, Clone)]
pub struct ArtifactContent {
    pub correlative_number: Option<String>,
    pub subject: String,
    pub body: String,
    pub priority: String,
    pub confidential: bool,
    pub department: Option<String>,
    pub author: String,
    pub recipients: Vec<String>,
    pub approved_at: String,
    pub seal: DigitalSeal,
}

/// Greedy word wrap; words longer than `width` are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    lines
}

pub fn layout(content: &ArtifactContent) -> Vec<Line> {
    let mut lines = Vec::new();

    let mut banner = format!("PRIORITY: {}", content.priority.to_ascii_uppercase());
    if content.confidential {
        banner.push_str("    CONFIDENTIAL");
    }
    lines.push(Line::new(LineStyle::Banner, banner));
    lines.push(Line::new(
        LineStyle::Heading,
        format!(
            "MEMORANDUM {}",
            content.correlative_number.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
    ));
    lines.push(Line::blank());

    let mut party = |label: &str, value: &str| {
        lines.push(Line::new(LineStyle::Label, format!("{label}: {value}")));
    };
    party("From", &content.author);
    party("To", &content.recipients.join(", "));
    if let Some(department) = &content.department {
        party("Department", department);
    }
    party("Subject", content.subject.trim());
    party("Approved", &content.approved_at);
    lines.push(Line::blank());

    lines.extend(
        wrap(content.body.trim(), WRAP_COLUMNS)
            .into_iter()
            .map(|text| Line::new(LineStyle::Text, text)),
    );
    lines.push(Line::blank());

    let seal = &content.seal;
    lines.push(Line::new(LineStyle::Label, "DIGITAL SEAL"));
    let mut signer = format!("Approved by {}", seal.approver.name);
    if !seal.approver.title.is_empty() {
        signer.push_str(&format!(", {}", seal.approver.title));
    }
    if let Some(department) = &seal.approver.department {
        signer.push_str(&format!(" ({department})"));
    }
    lines.push(Line::new(LineStyle::Text, signer));
    lines.push(Line::new(
        LineStyle::Small,
        format!("Sealed at {}", seal.sealed_at),
    ));
    lines.push(Line::new(
        LineStyle::Small,
        format!("Verification code: {}", seal.verification_code),
    ));
    lines.push(Line::new(
        LineStyle::Small,
        format!("Content hash ({}): {}", seal.algorithm, seal.content_hash),
    ));

    lines
}

/// Splits laid out lines into pages by vertical space.
pub fn paginate(lines: Vec<Line>) -> Vec<Vec<Line>> {
    let mut pages = vec![Vec::new()];
    let mut y = PAGE_TOP;
    for line in lines {
        let leading = line.style.leading();
        if y - leading < PAGE_BOTTOM {
            pages.push(Vec::new());
            y = PAGE_TOP;
        }
        y -= leading;
        if let Some(page) = pages.last_mut() {
            page.push(line);
        }
    }
    pages
}

/// Renders the signed copy. Blocking; run it off the async executor.
pub fn render(content: &ArtifactContent) -> Result<Vec<u8>, String> {
    let pages = paginate(layout(content));

    let pdfium = panic::catch_unwind(Pdfium::default)
        .map_err(|_| "failed to initialize PDFium".to_string())?;

    let mut document = pdfium
        .create_new_pdf()
        .map_err(|err| format!("create pdf: {err}"))?;
    let regular = document.fonts_mut().helvetica();
    let bold = document.fonts_mut().helvetica_bold();

    for lines in pages {
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .map_err(|err| format!("create page: {err}"))?;

        let mut y = PAGE_TOP;
        for line in lines {
            y -= line.style.leading();
            if line.text.is_empty() {
                continue;
            }
            let font = if line.style.bold() { bold } else { regular };
            page.objects_mut()
                .create_text_object(
                    PdfPoints::new(MARGIN_LEFT),
                    PdfPoints::new(y),
                    &line.text,
                    font,
                    PdfPoints::new(line.style.size()),
                )
                .map_err(|err| format!("place text: {err}"))?;
        }
    }

    document
        .save_to_bytes()
        .map_err(|err| format!("serialize pdf: {err}"))
}
