use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use crate::error::{Result, TtsError};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "docx", "pdf"];

const PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Word,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "txt" => Ok(Self::PlainText),
            "docx" => Ok(Self::Word),
            "pdf" => Ok(Self::Pdf),
            _ => Err(TtsError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    format!(".{}", extension)
                },
            }),
        }
    }
}

/// Plain text of a `.txt`, `.docx` or `.pdf` file. Formatting is dropped.
pub fn read_document(path: &Path) -> Result<String> {
    match DocumentKind::from_path(path)? {
        DocumentKind::PlainText => read_txt(path),
        DocumentKind::Word => read_docx(path),
        DocumentKind::Pdf => read_pdf(path),
    }
}

pub fn read_txt(path: &Path) -> Result<String> {
    info!("Reading TXT file: {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| TtsError::io(path, e))?;
    Ok(text.trim().to_string())
}

pub fn read_docx(path: &Path) -> Result<String> {
    info!("Reading DOCX file: {}", path.display());
    let file = fs::File::open(path).map_err(|e| TtsError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| TtsError::document(path, e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| TtsError::document(path, e))?
        .read_to_string(&mut xml)
        .map_err(|e| TtsError::io(path, e))?;

    Ok(docx_paragraphs(&xml).join("\n"))
}

pub fn read_pdf(path: &Path) -> Result<String> {
    info!("Reading PDF file: {}", path.display());
    let doc = lopdf::Document::load(path).map_err(|e| TtsError::document(path, e))?;
    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| TtsError::document(path, e))?;
        pages.push(text);
    }
    Ok(join_pages(&pages))
}

/// One segment per page, surrounding whitespace of each page removed.
fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|page| page.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

fn paragraph_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>|<w:p/>").expect("valid regex"))
}

fn run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?: [^>]*)?>(.*?)</w:t>|<w:tab/>|<w:br/>").expect("valid regex")
    })
}

/// Text of every non-empty `<w:p>` in a WordprocessingML body.
fn docx_paragraphs(xml: &str) -> Vec<String> {
    paragraph_regex()
        .find_iter(xml)
        .map(|paragraph| {
            let mut text = String::new();
            for run in run_regex().captures_iter(paragraph.as_str()) {
                match run.get(1) {
                    Some(t) => text.push_str(&decode_entities(t.as_str())),
                    None if run[0].starts_with("<w:tab") => text.push('\t'),
                    None => text.push('\n'),
                }
            }
            text
        })
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn char_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").expect("valid regex"))
}

/// Numeric references first, `&amp;` last so escaped ampersands stay literal.
fn decode_entities(raw: &str) -> String {
    let numeric = char_ref_regex().replace_all(raw, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            (None, None) => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    });
    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Excerpt shown before generating from a file.
pub fn file_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}...\n\n[File truncated for preview]", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn txt_is_trimmed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "\n  Hello there.  \n\n").unwrap();
        assert_eq!(read_document(&path).unwrap(), "Hello there.");
    }

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(
            DocumentKind::from_path(Path::new("A.TXT")).unwrap(),
            DocumentKind::PlainText
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("b.Docx")).unwrap(),
            DocumentKind::Word
        );
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = read_document(Path::new("slides.pptx")).unwrap_err();
        match err {
            TtsError::UnsupportedFormat { extension, .. } => assert_eq!(extension, ".pptx"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            DocumentKind::from_path(Path::new("README")),
            Err(TtsError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn docx_paragraphs_skip_empty_ones() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space="preserve"> line</w:t></w:r></w:p>
            <w:p/>
            <w:p><w:pPr/><w:r><w:t>   </w:t></w:r></w:p>
            <w:p w:rsidR="00A1"><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(docx_paragraphs(xml), vec!["First line", "Fish & chips"]);
    }

    #[test]
    fn character_references_are_decoded() {
        assert_eq!(decode_entities("It&#8217;s"), "It\u{2019}s");
        assert_eq!(decode_entities("a&#xA0;b&#X41;"), "a\u{a0}bA");
        assert_eq!(decode_entities("&amp;#65; &lt;tag&gt;"), "&#65; <tag>");
        assert_eq!(decode_entities("&#xD800;"), "&#xD800;");
    }

    #[test]
    fn docx_archive_is_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("letter.docx");
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>Dear reader,</w:t></w:r></w:p><w:p></w:p><w:p><w:r><w:t>Goodbye.</w:t></w:r></w:p></w:body></w:document>"#,
        )
        .unwrap();
        zip.finish().unwrap();

        assert_eq!(read_document(&path).unwrap(), "Dear reader,\nGoodbye.");
    }

    #[test]
    fn corrupt_docx_is_a_document_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, "not a zip").unwrap();
        assert!(matches!(
            read_document(&path),
            Err(TtsError::Document { .. })
        ));
    }

    #[test]
    fn pages_are_joined_by_newline() {
        let pages = vec!["Page one\n".to_string(), "  Page two ".to_string()];
        assert_eq!(join_pages(&pages), "Page one\nPage two");
    }

    #[test]
    fn pdf_text_is_extracted() {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 48.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("Hello World!")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.pdf");
        doc.save(&path).unwrap();

        let text = read_document(&path).unwrap();
        assert!(text.contains("Hello World!"), "got {:?}", text);
    }

    #[test]
    fn preview_is_capped() {
        let long = "a".repeat(1500);
        let preview = file_preview(&long);
        assert!(preview.starts_with(&"a".repeat(1000)));
        assert!(preview.ends_with("[File truncated for preview]"));
        assert_eq!(file_preview("short"), "short");
    }
}
