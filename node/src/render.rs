//! Terminal output for tokens.

use anyhow::Result;
use qrcode::QrCode;

/// Render `data` as a QR code made of text characters.
pub fn qr_string(data: &str) -> Result<String> {
    let code = QrCode::new(data)?;
    Ok(code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build())
}

/// Print a token to stdout, with its QR code unless `no_qr`.
pub fn print_token(token: &str, no_qr: bool) -> Result<()> {
    if !no_qr {
        println!("\n{}\n", qr_string(token)?);
    }
    println!("{token}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_token_sized_payload() {
        let token = format!("kid=kid-1&ct={}", "A".repeat(180));
        let qr = qr_string(&token).unwrap();
        assert!(qr.lines().count() > 20);
        assert!(qr.contains('█'));
    }
}
