use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;

use crate::converter::{PageRasterizer, PdfTextSource};
use crate::error::ConversionError;

/// Text layer extraction using the pdf-extract crate.
pub struct PdfExtractSource;

impl PdfTextSource for PdfExtractSource {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ConversionError> {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
            .map_err(|e| ConversionError::Corrupt(e.to_string()))
    }
}

/// Page "rendering" for scanned PDFs: returns the largest embedded image on
/// the page, which for scanner output is the page itself. JPEG streams pass
/// through untouched; Flate/LZW and unfiltered bitmaps are re-encoded as PNG.
pub struct LopdfPageImages;

impl PageRasterizer for LopdfPageImages {
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ConversionError> {
        let page = page_index + 1;
        let doc = Document::load_mem(pdf_bytes)
            .map_err(|e| ConversionError::Corrupt(format!("Failed to parse PDF: {e}")))?;

        let page_ids: Vec<ObjectId> = doc.page_iter().collect();
        let &page_id = page_ids.get(page_index).ok_or_else(|| ConversionError::Render {
            page,
            reason: format!("page not found (PDF has {} pages)", page_ids.len()),
        })?;

        let stream = largest_page_image(&doc, page_id).ok_or_else(|| ConversionError::Render {
            page,
            reason: "no embedded image on page".to_string(),
        })?;

        image_bytes(stream).map_err(|reason| ConversionError::Render { page, reason })
    }
}

fn largest_page_image(doc: &Document, page_id: ObjectId) -> Option<&Stream> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve_dict(doc, page, b"Resources")?;
    let xobjects = resolve_dict(doc, resources, b"XObject")?;

    let mut largest: Option<(i64, &Stream)> = None;
    for (_name, entry) in xobjects.iter() {
        let object = match entry {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(object) => object,
                Err(_) => continue,
            },
            other => other,
        };

        let Object::Stream(stream) = object else {
            continue;
        };
        if !has_name(&stream.dict, b"Subtype", b"Image") {
            continue;
        }

        let area = dimension(&stream.dict, b"Width").unwrap_or(0) as i64
            * dimension(&stream.dict, b"Height").unwrap_or(0) as i64;
        if largest.map_or(true, |(prev, _)| area > prev) {
            largest = Some((area, stream));
        }
    }
    largest.map(|(_, stream)| stream)
}

/// Encoded image bytes an OCR model can read.
fn image_bytes(stream: &Stream) -> Result<Vec<u8>, String> {
    let filters = filters(&stream.dict);
    if let Some(unsupported) = filters
        .iter()
        .find(|f| matches!(f.as_slice(), b"CCITTFaxDecode" | b"JBIG2Decode" | b"JPXDecode"))
    {
        return Err(format!(
            "unsupported image filter {}",
            String::from_utf8_lossy(unsupported)
        ));
    }
    if filters.len() == 1 && filters[0] == b"DCTDecode" {
        return Ok(stream.content.clone());
    }

    let data = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|e| format!("image stream could not be decompressed: {e}"))?
    };

    let image = match image::load_from_memory(&data) {
        Ok(image) => image,
        Err(_) => raw_bitmap(&stream.dict, data)?,
    };

    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageOutputFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    Ok(encoded.into_inner())
}

/// Rebuilds an 8-bit Gray, RGB or CMYK sample buffer from the image dictionary.
fn raw_bitmap(dict: &Dictionary, data: Vec<u8>) -> Result<DynamicImage, String> {
    let width = dimension(dict, b"Width").ok_or("image has no Width")?;
    let height = dimension(dict, b"Height").ok_or("image has no Height")?;
    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return Err(format!("unsupported bit depth {bits}"));
    }

    let color_space = match dict.get(b"ColorSpace") {
        Ok(Object::Name(name)) => name.clone(),
        _ => b"DeviceRGB".to_vec(),
    };
    let pixels = width as usize * height as usize;
    let mismatch = || format!("sample data does not match {width}x{height} image");

    match color_space.as_slice() {
        b"DeviceGray" => GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(mismatch),
        b"DeviceRGB" => RgbImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(mismatch),
        b"DeviceCMYK" => {
            if data.len() < pixels * 4 {
                return Err(mismatch());
            }
            let rgb = data
                .chunks_exact(4)
                .take(pixels)
                .flat_map(|cmyk| {
                    let k = 255 - cmyk[3] as u16;
                    cmyk[..3].iter().map(move |&c| ((255 - c as u16) * k / 255) as u8).collect::<Vec<_>>()
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(mismatch)
        }
        other => Err(format!(
            "unsupported color space {}",
            String::from_utf8_lossy(other)
        )),
    }
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|f| match f {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    match dict.get(key).ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(inner) => Some(inner),
        _ => None,
    }
}

fn has_name(dict: &Dictionary, key: &[u8], expected: &[u8]) -> bool {
    matches!(dict.get(key), Ok(Object::Name(name)) if name.as_slice() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use lopdf::dictionary;

    fn jpeg_stream(bytes: &[u8]) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            bytes.to_vec(),
        )
    }

    /// 64x64 grayscale gradient, Flate-compressed the way scanners emit it.
    fn flate_gray_stream() -> Stream {
        let pixels: Vec<u8> = (0..64u32 * 64).map(|i| (i % 256) as u8).collect();
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 64,
                "Height" => 64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            pixels,
        );
        stream.compress().unwrap();
        stream
    }

    /// Build a one-page PDF with a text layer and, optionally, an embedded image.
    fn make_test_pdf(text: &str, image: Option<Stream>) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        if let Some(stream) = image {
            let image_id = doc.add_object(stream);
            resources.set("XObject", dictionary! { "Im1" => image_id });
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_extracts_text_layer() {
        let pdf = make_test_pdf("Acme Growth Fund II", None);
        let pages = PdfExtractSource.extract_pages(&pdf).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("Acme") || pages[0].contains("Growth"));
    }

    #[test]
    fn test_invalid_pdf_is_corrupt() {
        let err = PdfExtractSource.extract_pages(b"%PDF-garbage").unwrap_err();
        assert!(matches!(err, ConversionError::Corrupt(_)));
    }

    #[test]
    fn test_renders_embedded_jpeg() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
        let pdf = make_test_pdf("", Some(jpeg_stream(&jpeg)));
        let image = LopdfPageImages.render_page(&pdf, 0, 300).unwrap();
        assert_eq!(image, jpeg);
    }

    #[test]
    fn test_renders_flate_grayscale_scan_as_png() {
        let pdf = make_test_pdf("", Some(flate_gray_stream()));
        let png = LopdfPageImages.render_page(&pdf, 0, 300).unwrap();

        assert!(png.starts_with(b"\x89PNG"));
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_fax_encoded_scan_names_its_filter() {
        let fax = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1700,
                "Height" => 2200,
                "BitsPerComponent" => 1,
                "Filter" => "CCITTFaxDecode",
            },
            vec![0u8; 32],
        );
        let pdf = make_test_pdf("", Some(fax));

        let err = LopdfPageImages.render_page(&pdf, 0, 300).unwrap_err();
        assert!(matches!(err, ConversionError::Render { page: 1, ref reason } if reason.contains("CCITTFaxDecode")));
    }

    #[test]
    fn test_page_without_image_is_render_error() {
        let pdf = make_test_pdf("text only", None);
        let err = LopdfPageImages.render_page(&pdf, 0, 300).unwrap_err();
        assert!(matches!(err, ConversionError::Render { page: 1, .. }));

        let err = LopdfPageImages.render_page(&pdf, 4, 300).unwrap_err();
        assert!(matches!(err, ConversionError::Render { page: 5, .. }));
    }
}
