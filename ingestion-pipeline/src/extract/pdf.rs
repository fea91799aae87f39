use lopdf::{content::Content, Document, Object};
use tracing::debug;

use common::error::AppError;

/// Raw output of one PDF strategy, before normalization.
pub(crate) struct PdfExtraction {
    pub text: String,
    pub page_count: usize,
    pub page_failures: usize,
}

/// Walks the parsed document page by page. Catches table and layout text
/// that the whole-document pass sometimes drops. A page that cannot be
/// read contributes nothing but does not fail the document.
pub(crate) fn extract_structured(bytes: &[u8]) -> Result<PdfExtraction, AppError> {
    let document = load(bytes)?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let page_count = page_numbers.len();

    let mut sections = Vec::with_capacity(page_count);
    let mut page_failures = 0;
    for page in page_numbers {
        match document.extract_text(&[page]) {
            Ok(text) => sections.push(text),
            Err(err) => {
                page_failures += 1;
                debug!(page, error = %err, "failed to extract text from page");
            }
        }
    }

    Ok(PdfExtraction {
        text: sections.join("\n\n"),
        page_count,
        page_failures,
    })
}

/// Whole-document pass through `pdf-extract`. Fastest on well-formed
/// files, but fails outright on structures it cannot handle.
pub(crate) fn extract_fast(bytes: &[u8]) -> Result<PdfExtraction, AppError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| AppError::Extraction(format!("pdf text extraction failed: {err}")))?;
    let page_count = Document::load_mem(bytes)
        .map(|document| document.get_pages().len())
        .unwrap_or(0);

    Ok(PdfExtraction {
        text,
        page_count,
        page_failures: 0,
    })
}

/// Last-resort scan of the content streams for string operands of the
/// text-showing operators. Loses layout and encoding fidelity but can pull
/// words out of documents both other strategies reject.
pub(crate) fn extract_raw(bytes: &[u8]) -> Result<PdfExtraction, AppError> {
    let document = load(bytes)?;
    let pages = document.get_pages();
    let page_count = pages.len();

    let mut out = String::new();
    let mut page_failures = 0;
    for page_id in pages.into_values() {
        let content_bytes = match document.get_page_content(page_id) {
            Ok(bytes) => bytes,
            Err(_) => {
                page_failures += 1;
                continue;
            }
        };
        let content = match Content::decode(&content_bytes) {
            Ok(content) => content,
            Err(_) => {
                page_failures += 1;
                continue;
            }
        };

        for operation in &content.operations {
            match operation.operator.as_str() {
                "Tj" | "'" | "\"" => {
                    for operand in &operation.operands {
                        push_string_operand(operand, &mut out);
                    }
                    out.push(' ');
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operation.operands.first() {
                        for item in items {
                            push_string_operand(item, &mut out);
                        }
                        out.push(' ');
                    }
                }
                "ET" => out.push('\n'),
                _ => {}
            }
        }
        out.push('\n');
    }

    Ok(PdfExtraction {
        text: out,
        page_count,
        page_failures,
    })
}

fn load(bytes: &[u8]) -> Result<Document, AppError> {
    Document::load_mem(bytes)
        .map_err(|err| AppError::Extraction(format!("failed to parse PDF: {err}")))
}

fn push_string_operand(object: &Object, out: &mut String) {
    if let Object::String(bytes, _) = object {
        out.push_str(&String::from_utf8_lossy(bytes));
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, ObjectId, Stream};

    fn text_ops(text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn helvetica(doc: &mut Document) -> ObjectId {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        })
    }

    fn finish(mut doc: Document, pages_id: ObjectId, page_id: ObjectId) -> Vec<u8> {
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize pdf");
        bytes
    }

    /// One page showing `text` through a standard Helvetica font.
    pub(crate) fn single_page(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = helvetica(&mut doc);
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: text_ops(text),
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        finish(doc, pages_id, page_id)
    }

    /// One page showing `page_text` directly plus `form_text` inside a
    /// form XObject. Extractors that only walk the page content stream
    /// see `page_text` alone; renderers that follow `Do` see both.
    pub(crate) fn with_form_xobject(page_text: &str, form_text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = helvetica(&mut doc);

        let form_content = Content {
            operations: text_ops(form_text),
        };
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            },
            form_content.encode().expect("encode form content"),
        ));

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Fm0" => form_id },
        });

        let mut operations = text_ops(page_text);
        operations.push(Operation::new("Do", vec!["Fm0".into()]));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        finish(doc, pages_id, page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let garbage = b"this is not a pdf at all";
        assert!(extract_structured(garbage).is_err());
        assert!(extract_raw(garbage).is_err());
        assert!(extract_fast(garbage).is_err());
    }

    #[test]
    fn test_every_strategy_reads_page_text() {
        let bytes = fixtures::single_page("Venue lies in the district court of first instance.");

        let structured = extract_structured(&bytes).unwrap();
        assert_eq!(structured.page_count, 1);
        assert_eq!(structured.page_failures, 0);
        assert!(structured.text.contains("district court"));

        let fast = extract_fast(&bytes).unwrap();
        assert!(fast.text.contains("district court"));

        let raw = extract_raw(&bytes).unwrap();
        assert_eq!(raw.page_count, 1);
        assert!(raw.text.contains("district court"));
    }
}
