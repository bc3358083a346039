// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic badge and certificate artifact rendering.
//!
//! Artifacts are SVG documents built from a fixed template: identical inputs
//! produce identical bytes, with the issuance timestamp passed in by the
//! caller rather than sampled here. That keeps re-rendering on a retried
//! stage byte-stable, so blob ids minted against earlier renders stay valid.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{BlobId, OwnerAddress};

const CERTIFICATE_WIDTH: u32 = 900;
const CERTIFICATE_HEIGHT: u32 = 620;
const BADGE_SIZE: u32 = 320;

/// Inputs to one render. All fields appear as text in the artifact.
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
    pub owner: &'a OwnerAddress,
    pub media_blob_id: &'a BlobId,
    pub manifest_blob_id: &'a BlobId,
    pub attestation_hash: &'a str,
    pub issued_at: DateTime<Utc>,
}

/// Renders the pipeline's terminal artifacts.
#[derive(Debug, Clone, Default)]
pub struct CertificateRenderer;

impl CertificateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render the full certificate document.
    pub fn render_certificate(&self, input: &RenderInput<'_>) -> Vec<u8> {
        let issued = input.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let svg = format!(
            concat!(
                r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"##,
                r##"<rect width="{w}" height="{h}" fill="#0b1021"/>"##,
                r##"<rect x="24" y="24" width="852" height="572" fill="none" stroke="#c9a24b" stroke-width="3"/>"##,
                r##"<text x="450" y="110" text-anchor="middle" font-family="Georgia, serif" font-size="42" fill="#f5efdf">Certificate of Authenticity</text>"##,
                r##"<text x="450" y="170" text-anchor="middle" font-family="Georgia, serif" font-size="18" fill="#c9a24b">Verified media provenance record</text>"##,
                r##"<text x="90" y="260" font-family="monospace" font-size="16" fill="#f5efdf">Owner: {owner}</text>"##,
                r##"<text x="90" y="310" font-family="monospace" font-size="16" fill="#f5efdf">Media blob: {media}</text>"##,
                r##"<text x="90" y="360" font-family="monospace" font-size="16" fill="#f5efdf">Manifest blob: {manifest}</text>"##,
                r##"<text x="90" y="410" font-family="monospace" font-size="14" fill="#f5efdf">Attestation: {attestation}</text>"##,
                r##"<text x="90" y="500" font-family="Georgia, serif" font-size="16" fill="#c9a24b">Issued {issued}</text>"##,
                r##"</svg>"##,
            ),
            w = CERTIFICATE_WIDTH,
            h = CERTIFICATE_HEIGHT,
            owner = escape_xml(&input.owner.0),
            media = escape_xml(&input.media_blob_id.0),
            manifest = escape_xml(&input.manifest_blob_id.0),
            attestation = escape_xml(input.attestation_hash),
            issued = issued,
        );
        svg.into_bytes()
    }

    /// Render the compact badge.
    pub fn render_badge(&self, input: &RenderInput<'_>) -> Vec<u8> {
        let issued = input.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let short_hash: String = input.attestation_hash.chars().take(16).collect();
        let svg = format!(
            concat!(
                r##"<svg xmlns="http://www.w3.org/2000/svg" width="{s}" height="{s}" viewBox="0 0 {s} {s}">"##,
                r##"<circle cx="160" cy="160" r="150" fill="#0b1021" stroke="#c9a24b" stroke-width="6"/>"##,
                r##"<text x="160" y="130" text-anchor="middle" font-family="Georgia, serif" font-size="28" fill="#f5efdf">Verified</text>"##,
                r##"<text x="160" y="175" text-anchor="middle" font-family="monospace" font-size="14" fill="#c9a24b">{hash}</text>"##,
                r##"<text x="160" y="220" text-anchor="middle" font-family="Georgia, serif" font-size="12" fill="#f5efdf">{issued}</text>"##,
                r##"</svg>"##,
            ),
            s = BADGE_SIZE,
            hash = escape_xml(&short_hash),
            issued = issued,
        );
        svg.into_bytes()
    }
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn input<'a>(
        owner: &'a OwnerAddress,
        media: &'a BlobId,
        manifest: &'a BlobId,
    ) -> RenderInput<'a> {
        RenderInput {
            owner,
            media_blob_id: media,
            manifest_blob_id: manifest,
            attestation_hash: "aa11bb22cc33dd44",
            issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn rendering_is_deterministic_for_identical_inputs() {
        let owner = OwnerAddress("0xowner".into());
        let media = BlobId("media-blob".into());
        let manifest = BlobId("manifest-blob".into());
        let renderer = CertificateRenderer::new();

        let first = renderer.render_certificate(&input(&owner, &media, &manifest));
        let second = renderer.render_certificate(&input(&owner, &media, &manifest));
        assert_eq!(first, second);

        let badge_first = renderer.render_badge(&input(&owner, &media, &manifest));
        let badge_second = renderer.render_badge(&input(&owner, &media, &manifest));
        assert_eq!(badge_first, badge_second);
    }

    #[test]
    fn certificate_embeds_all_text_fields() {
        let owner = OwnerAddress("0xowner".into());
        let media = BlobId("media-blob".into());
        let manifest = BlobId("manifest-blob".into());
        let bytes = CertificateRenderer::new().render_certificate(&input(&owner, &media, &manifest));
        let svg = String::from_utf8(bytes).unwrap();

        assert!(svg.contains("0xowner"));
        assert!(svg.contains("media-blob"));
        assert!(svg.contains("manifest-blob"));
        assert!(svg.contains("aa11bb22cc33dd44"));
        assert!(svg.contains("2026-03-14T09:26:53Z"));
    }

    #[test]
    fn different_timestamps_change_the_bytes() {
        let owner = OwnerAddress("0xowner".into());
        let media = BlobId("media-blob".into());
        let manifest = BlobId("manifest-blob".into());
        let renderer = CertificateRenderer::new();

        let mut later = input(&owner, &media, &manifest);
        later.issued_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 54).unwrap();

        assert_ne!(
            renderer.render_certificate(&input(&owner, &media, &manifest)),
            renderer.render_certificate(&later)
        );
    }

    #[test]
    fn text_fields_are_xml_escaped() {
        let owner = OwnerAddress("a<b>&\"c\"".into());
        let media = BlobId("media".into());
        let manifest = BlobId("manifest".into());
        let bytes = CertificateRenderer::new().render_certificate(&input(&owner, &media, &manifest));
        let svg = String::from_utf8(bytes).unwrap();

        assert!(svg.contains("a&lt;b&gt;&amp;&quot;c&quot;"));
        assert!(!svg.contains("a<b>"));
    }
}
