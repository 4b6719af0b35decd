//! Printable PDF summary of a single idea.

use chrono::NaiveDate;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use unicode_normalization::UnicodeNormalization;

use crate::models::Rating;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const BODY_SIZE: f32 = 11.0;
const BODY_LINE: f32 = 5.5;
/// Helvetica at 11pt fits roughly this many characters per A4 line.
const BODY_CHARS: usize = 90;

#[derive(Debug, thiserror::Error)]
pub enum HandoutError {
    #[error("pdf rendering failed: {0}")]
    Render(#[from] printpdf::Error),
}

/// Everything printed on the handout, already translated.
#[derive(Debug, Clone)]
pub struct Handout {
    pub title: String,
    pub author: Option<String>,
    pub rating: Option<Rating>,
    pub categories: Vec<String>,
    pub content: String,
    pub created: NaiveDate,
}

/// Lower-case ASCII slug. Accented letters lose their marks (NFKD), other
/// non-ASCII characters and punctuation are dropped, and runs of whitespace
/// and `-` become one dash. Underscores are kept.
pub fn slugify(text: &str) -> String {
    let ascii: String = text.nfkd().filter(char::is_ascii).collect();
    let mut out = String::new();
    let mut pending_dash = false;
    for c in ascii.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// `Content-Disposition` value for the handout of `title` rendered on `date`.
pub fn content_disposition(date: NaiveDate, title: &str) -> String {
    format!("inline; filename={}-{}-handout.pdf", date.format("%Y-%m-%d"), slugify(title))
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word = word.to_string();
            while word.chars().count() > width {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let head: String = word.chars().take(width).collect();
                word = word.chars().skip(width).collect();
                lines.push(head);
            }
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    lines
}

struct Cursor {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
}

impl Cursor {
    fn line(&mut self, text: &str, size: f32, height: f32, font: &IndirectFontRef) {
        if self.y - height < MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN;
        }
        self.y -= height;
        self.layer.use_text(text, size, Mm(MARGIN), Mm(self.y), font);
    }
}

/// Render the handout. CPU bound; call from a blocking context.
pub fn render(handout: &Handout) -> Result<Vec<u8>, HandoutError> {
    let (doc, page, layer) = PdfDocument::new(&handout.title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "content");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;
    let layer = doc.get_page(page).get_layer(layer);
    let mut cur = Cursor { doc, layer, y: PAGE_HEIGHT - MARGIN };

    for line in wrap(&handout.title, 45) {
        cur.line(&line, 20.0, 9.0, &bold);
    }
    cur.y -= 4.0;
    if let Some(author) = &handout.author {
        cur.line(&format!("By {author}"), BODY_SIZE, BODY_LINE, &regular);
    }
    cur.line(&handout.created.format("%Y-%m-%d").to_string(), BODY_SIZE, BODY_LINE, &regular);
    if let Some(rating) = handout.rating {
        cur.line(&format!("Rating: {} / 5", rating.value()), BODY_SIZE, BODY_LINE, &regular);
    }
    if !handout.categories.is_empty() {
        cur.line(&format!("Categories: {}", handout.categories.join(", ")), BODY_SIZE, BODY_LINE, &regular);
    }
    cur.y -= BODY_LINE;
    for line in wrap(&handout.content, BODY_CHARS) {
        cur.line(&line, BODY_SIZE, BODY_LINE, &regular);
    }

    Ok(cur.doc.save_to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_drop_punctuation_and_accents() {
        assert_eq!(slugify("Green Roofs, for everyone!"), "green-roofs-for-everyone");
        assert_eq!(slugify("  Éoliennes -- urbaines_2 "), "eoliennes-urbaines_2");
        assert_eq!(slugify("Ąžuolų sodinimas"), "azuolu-sodinimas");
        assert_eq!(slugify("Größere Gärten"), "groere-garten");
        assert_eq!(slugify("__a.b__"), "ab");
    }

    #[test]
    fn disposition_uses_date_and_slug() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(content_disposition(date, "Solar Roofs"), "inline; filename=2024-05-01-solar-roofs-handout.pdf");
    }

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn renders_a_pdf() {
        let bytes = render(&Handout {
            title: "Solar roofs".into(),
            author: Some("Ada".into()),
            rating: Rating::new(4),
            categories: vec!["Energy".into()],
            content: "Put panels on every roof. ".repeat(200),
            created: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        })
        .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
