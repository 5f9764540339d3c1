// QR code for the share section.

use qrcode::render::svg;
use qrcode::QrCode;

use crate::poll::*;

/// Renders `url` as a standalone SVG document. The output only depends on `url`.
pub fn render_qr_svg(url: &str) -> PollResult<String> {
    let code = QrCode::new(url.as_bytes()).context(RenderingQrSnafu { url })?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(320, 320)
        .quiet_zone(true)
        .build();
    debug!("render_qr_svg: {} bytes for {:?}", image.len(), url);
    Ok(image)
}
