//! Per-site displacement buffers and windowed feature extraction

pub mod site_buffer;
pub mod window;

pub use site_buffer::{ChannelBuffer, SiteBuffer};
pub use window::{extract_offsets, extract_peak_displacements, OffsetWindow, PgdWindow};

use crate::types::{ModelKind, SiteMetadata};

/// A monitored site: static metadata plus its owned buffers.
#[derive(Debug, Clone)]
pub struct Site {
    pub meta: SiteMetadata,
    pub buffer: SiteBuffer,
}

impl Site {
    /// Buffer window ends at `now` and spans `bufflen` seconds.
    pub fn new(meta: SiteMetadata, bufflen: f64, now: f64) -> Self {
        let buffer = SiteBuffer::new(bufflen, meta.dt, now - bufflen);
        Self { meta, buffer }
    }

    /// Masked out of the given inversion
    pub fn is_skipped(&self, model: ModelKind) -> bool {
        match model {
            ModelKind::Pgd => self.meta.skip_pgd,
            ModelKind::Cmt => self.meta.skip_cmt,
            ModelKind::Ff => self.meta.skip_ff,
        }
    }
}

/// Build the site set from resolved metadata.
pub fn build_sites(metadata: Vec<SiteMetadata>, bufflen: f64, now: f64) -> Vec<Site> {
    metadata.into_iter().map(|meta| Site::new(meta, bufflen, now)).collect()
}
