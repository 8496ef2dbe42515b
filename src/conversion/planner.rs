//! Conversion planning.
//!
//! Planning is pure: it looks only at what intake accepted and at which
//! processing capabilities this deployment has, and returns an immutable
//! [`ConversionPlan`].

use chrono::Utc;
use mediagate_common::paths::{is_jpeg_extension, is_vector_extension};
use mediagate_common::{
    ExecutionSite, MediaItemId, MediaType, PlanId, ProcessingPath, QualityLabel, TargetFormat,
};
use mediagate_db::models::ConversionPlan;
use thiserror::Error;

use crate::intake::AcceptedFile;

/// Processing capabilities available to the planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerCapabilities {
    /// This host can transcode images and audio itself.
    pub local_transcode: bool,
    /// A remote processing service is configured.
    pub remote_configured: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Environment unsupported: {0}")]
    EnvironmentUnsupported(String),
}

/// Choose a route for an accepted file.
pub fn plan(
    item_id: MediaItemId,
    accepted: &AcceptedFile,
    caps: PlannerCapabilities,
) -> Result<ConversionPlan, PlanError> {
    let media_type = accepted.media_type().ok_or_else(|| {
        PlanError::UnsupportedFormat("documents are stored as-is and never converted".to_string())
    })?;

    let (target_format, requested_variants, route, execution_site) = match media_type {
        MediaType::Image => plan_image(&accepted.extension, caps)?,
        MediaType::Video => {
            if !caps.remote_configured {
                return Err(PlanError::EnvironmentUnsupported(
                    "video requires the remote processing service".to_string(),
                ));
            }
            let variants = variants_for_resolution(accepted.file.width, accepted.file.height);
            (
                TargetFormat::SourceContainer,
                variants,
                ProcessingPath::None,
                ExecutionSite::Remote,
            )
        }
        MediaType::Audio => {
            let site = pick_site(caps, "audio")?;
            (TargetFormat::Webm, Vec::new(), ProcessingPath::None, site)
        }
    };

    Ok(ConversionPlan {
        id: PlanId::new(),
        item_id,
        target_format,
        requested_variants,
        route,
        execution_site,
        issued_at: Utc::now(),
    })
}

fn plan_image(
    extension: &str,
    caps: PlannerCapabilities,
) -> Result<(TargetFormat, Vec<QualityLabel>, ProcessingPath, ExecutionSite), PlanError> {
    // JPEG is served as-is; vector images have nothing to rasterise
    if is_jpeg_extension(extension) || is_vector_extension(extension) {
        return Ok((
            TargetFormat::Original,
            Vec::new(),
            ProcessingPath::JpegPassthrough,
            ExecutionSite::Local,
        ));
    }

    let site = pick_site(caps, "image")?;
    let route = match site {
        ExecutionSite::Local => ProcessingPath::WebpLocal,
        ExecutionSite::Remote => ProcessingPath::WebpServer,
    };
    Ok((TargetFormat::Webp, Vec::new(), route, site))
}

fn pick_site(caps: PlannerCapabilities, what: &str) -> Result<ExecutionSite, PlanError> {
    if caps.local_transcode {
        Ok(ExecutionSite::Local)
    } else if caps.remote_configured {
        Ok(ExecutionSite::Remote)
    } else {
        Err(PlanError::EnvironmentUnsupported(format!(
            "no local transcoder and no remote processing service for {}",
            what
        )))
    }
}

/// Renditions worth producing for a source of the given size.
///
/// 480p is always requested. Higher labels are requested only when the
/// source's short side reaches them, so nothing is upscaled.
pub fn variants_for_resolution(width: Option<u32>, height: Option<u32>) -> Vec<QualityLabel> {
    let short_side = match (width, height) {
        (Some(w), Some(h)) => w.min(h),
        _ => 0,
    };

    QualityLabel::ALL
        .into_iter()
        .filter(|label| *label == QualityLabel::P480 || short_side >= label.lines())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{validate, CandidateFile, DeclaredKind, Environment, IntakeLimits};
    use assert_matches::assert_matches;

    const LOCAL: PlannerCapabilities = PlannerCapabilities {
        local_transcode: true,
        remote_configured: false,
    };
    const REMOTE: PlannerCapabilities = PlannerCapabilities {
        local_transcode: false,
        remote_configured: true,
    };
    const BOTH: PlannerCapabilities = PlannerCapabilities {
        local_transcode: true,
        remote_configured: true,
    };

    fn accept(name: &str, kind: DeclaredKind, dims: Option<(u32, u32)>) -> AcceptedFile {
        let file = CandidateFile {
            file_name: name.to_string(),
            size_bytes: 3 * 1024 * 1024,
            mime_type: None,
            width: dims.map(|d| d.0),
            height: dims.map(|d| d.1),
        };
        validate(&file, kind, &Environment::default(), &IntakeLimits::default()).unwrap()
    }

    #[test]
    fn test_heic_with_local_transcode_is_webp_local() {
        let plan = plan(MediaItemId::new(), &accept("a.heic", DeclaredKind::Image, None), LOCAL)
            .unwrap();
        assert_eq!(plan.route, ProcessingPath::WebpLocal);
        assert_eq!(plan.target_format, TargetFormat::Webp);
        assert_eq!(plan.execution_site, ExecutionSite::Local);
        assert!(plan.requested_variants.is_empty());
    }

    #[test]
    fn test_png_without_local_transcode_goes_remote() {
        let plan = plan(MediaItemId::new(), &accept("a.png", DeclaredKind::Image, None), REMOTE)
            .unwrap();
        assert_eq!(plan.route, ProcessingPath::WebpServer);
        assert_eq!(plan.execution_site, ExecutionSite::Remote);
    }

    #[test]
    fn test_jpeg_and_svg_pass_through() {
        for name in ["photo.JPG", "photo.jpeg", "logo.svg"] {
            let plan =
                plan(MediaItemId::new(), &accept(name, DeclaredKind::Image, None), REMOTE).unwrap();
            assert_eq!(plan.route, ProcessingPath::JpegPassthrough, "{}", name);
            assert!(plan.is_passthrough());
        }
    }

    #[test]
    fn test_image_without_any_transcoder() {
        let result = plan(
            MediaItemId::new(),
            &accept("a.webp", DeclaredKind::Image, None),
            PlannerCapabilities::default(),
        );
        assert_matches!(result, Err(PlanError::EnvironmentUnsupported(_)));
    }

    #[test]
    fn test_full_hd_video_requests_all_variants() {
        let plan = plan(
            MediaItemId::new(),
            &accept("clip.mp4", DeclaredKind::Video, Some((1920, 1080))),
            BOTH,
        )
        .unwrap();
        assert_eq!(
            plan.requested_variants,
            vec![QualityLabel::P480, QualityLabel::P720, QualityLabel::P1080]
        );
        assert_eq!(plan.execution_site, ExecutionSite::Remote);
        assert_eq!(plan.target_format, TargetFormat::SourceContainer);
        assert_eq!(plan.route, ProcessingPath::None);
    }

    #[test]
    fn test_video_requires_remote() {
        let result = plan(
            MediaItemId::new(),
            &accept("clip.mp4", DeclaredKind::Video, Some((1280, 720))),
            LOCAL,
        );
        assert_matches!(result, Err(PlanError::EnvironmentUnsupported(_)));
    }

    #[test]
    fn test_audio_targets_webm() {
        let local = plan(MediaItemId::new(), &accept("a.wav", DeclaredKind::Audio, None), LOCAL)
            .unwrap();
        assert_eq!(local.target_format, TargetFormat::Webm);
        assert_eq!(local.execution_site, ExecutionSite::Local);

        let remote = plan(MediaItemId::new(), &accept("a.wav", DeclaredKind::Audio, None), REMOTE)
            .unwrap();
        assert_eq!(remote.execution_site, ExecutionSite::Remote);
    }

    #[test]
    fn test_documents_are_never_planned() {
        let result = plan(
            MediaItemId::new(),
            &accept("notes.txt", DeclaredKind::Document, None),
            BOTH,
        );
        assert_matches!(result, Err(PlanError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_variants_follow_short_side() {
        assert_eq!(variants_for_resolution(Some(854), Some(480)), vec![QualityLabel::P480]);
        assert_eq!(
            variants_for_resolution(Some(1280), Some(720)),
            vec![QualityLabel::P480, QualityLabel::P720]
        );
        // Portrait 1080x1920 has a 1080 short side
        assert_eq!(variants_for_resolution(Some(1080), Some(1920)).len(), 3);
        assert_eq!(variants_for_resolution(Some(640), Some(360)), vec![QualityLabel::P480]);
        assert_eq!(variants_for_resolution(None, None), vec![QualityLabel::P480]);
    }
}
