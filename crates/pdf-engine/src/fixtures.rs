//! Synthetic documents for tests.

use lopdf::{dictionary, Document, Object, Stream};

use crate::PdfEngineError;

/// Build a document of `page_count` empty pages, each `width_pt` x `height_pt`
pub fn blank_document(
    page_count: u32,
    width_pt: f32,
    height_pt: f32,
) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(page_count as usize);
    for _ in 0..page_count {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| PdfEngineError::Render(format!("failed to serialize fixture: {err}")))?;
    Ok(bytes)
}

/// Write a blank document to `path`
pub fn write_blank_document(
    path: &std::path::Path,
    page_count: u32,
) -> Result<(), PdfEngineError> {
    let bytes = blank_document(page_count, 612.0, 792.0)?;
    std::fs::write(path, bytes)
        .map_err(|err| PdfEngineError::Render(format!("failed to write fixture: {err}")))
}
