//! Built-in pages the coordinator serves itself.

use std::sync::LazyLock;

use spindle_runtime::debug::escape_html;

const STYLE: &str = "<style>body{font-family:sans-serif;margin:0;display:flex;\
align-items:center;justify-content:center;min-height:100vh;background:#fafafa}\
main{text-align:center}h1{font-size:4em;margin:0;color:#444}p{color:#777}</style>";

fn page(title: &str, heading: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>{}</title>{STYLE}</head>\
<body><main><h1>{}</h1><p>{}</p></main></body></html>",
        escape_html(title),
        escape_html(heading),
        escape_html(message)
    )
}

/// Plain-text reply for a route whose worker hasn't registered yet.
pub fn still_loading(route: &str) -> String {
    format!("Endpoint {route} is still loading. Try again for a few seconds")
}

pub fn not_found(path: &str) -> String {
    page("Not Found", "404", &format!("Nothing lives at {path}."))
}

pub fn unauthorized() -> String {
    page("Unauthorized", "401", "You are not allowed to see this page.")
}

/// Rendered for a worker's system notice (code 700).
pub fn notice(message: &str) -> String {
    page("Notice", "Notice", message)
}

pub fn gateway_timeout(route: &str) -> String {
    page("Gateway Timeout", "504", &format!("Endpoint {route} did not finish in time."))
}

pub fn bad_gateway(route: &str) -> String {
    page("Bad Gateway", "502", &format!("Endpoint {route} could not be reached."))
}

/// 16×16 single-image ICO: a filled circle on a transparent background.
pub static FAVICON: LazyLock<Vec<u8>> = LazyLock::new(|| render_icon(16, [0x3b, 0x6e, 0xd6]));

fn render_icon(size: u32, [r, g, b]: [u8; 3]) -> Vec<u8> {
    let xor_len = size * size * 4;
    // AND mask rows are padded to 32 bits.
    let and_len = size.div_ceil(32) * 4 * size;
    let image_len = 40 + xor_len + and_len;

    let mut ico = Vec::with_capacity((6 + 16 + image_len) as usize);
    // ICONDIR
    ico.extend_from_slice(&[0, 0, 1, 0, 1, 0]);
    // ICONDIRENTRY
    ico.extend_from_slice(&[size as u8, size as u8, 0, 0]);
    ico.extend_from_slice(&1u16.to_le_bytes());
    ico.extend_from_slice(&32u16.to_le_bytes());
    ico.extend_from_slice(&image_len.to_le_bytes());
    ico.extend_from_slice(&22u32.to_le_bytes());
    // BITMAPINFOHEADER; height covers XOR and AND planes.
    ico.extend_from_slice(&40u32.to_le_bytes());
    ico.extend_from_slice(&(size as i32).to_le_bytes());
    ico.extend_from_slice(&((size * 2) as i32).to_le_bytes());
    ico.extend_from_slice(&1u16.to_le_bytes());
    ico.extend_from_slice(&32u16.to_le_bytes());
    ico.extend_from_slice(&[0; 24]);

    let c = (size as f32 - 1.0) / 2.0;
    let radius = size as f32 / 2.0 - 0.5;
    for y in 0..size {
        for x in 0..size {
            let (dx, dy) = (x as f32 - c, y as f32 - c);
            let alpha = if dx * dx + dy * dy <= radius * radius { 0xff } else { 0 };
            ico.extend_from_slice(&[b, g, r, alpha]);
        }
    }
    ico.resize(ico.len() + and_len as usize, 0);
    ico
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_loading_text_is_exact() {
        assert_eq!(
            still_loading("blog"),
            "Endpoint blog is still loading. Try again for a few seconds"
        );
    }

    #[test]
    fn notice_escapes_message() {
        let html = notice("<b>db down</b>");
        assert!(html.contains("&lt;b&gt;db down&lt;/b&gt;"));
    }

    #[test]
    fn favicon_is_a_well_formed_ico() {
        let ico = &*FAVICON;
        assert_eq!(&ico[..4], &[0, 0, 1, 0]);
        let len = u32::from_le_bytes(ico[14..18].try_into().unwrap()) as usize;
        let offset = u32::from_le_bytes(ico[18..22].try_into().unwrap()) as usize;
        assert_eq!(offset + len, ico.len());
    }
}
