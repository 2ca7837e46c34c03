//! Pooled offscreen render targets for layer rendering.
//!
//! Every non-root layer renders into a leased page. Pages are power-of-two
//! sized and reused across frames; the pool grows pages but never shrinks
//! them, so steady-state frames allocate nothing.

use tracing::debug;

/// Most pages the pool will hold. Deeper layer nesting within one frame
/// degrades those layers instead of allocating past the cap.
pub const MAX_PAGES: usize = 16;

const MIN_PAGE_SIZE: u32 = 16;
const MAX_PAGE_SIZE: u32 = 4096;

/// Round a requested size up to the pool's page granularity. `None` when
/// either dimension exceeds the maximum surface size; such requests are
/// refused rather than cropped.
pub fn page_extent(width: u32, height: u32) -> Option<(u32, u32)> {
    if width > MAX_PAGE_SIZE || height > MAX_PAGE_SIZE {
        return None;
    }
    let round = |v: u32| v.max(MIN_PAGE_SIZE).next_power_of_two().min(MAX_PAGE_SIZE);
    Some((round(width), round(height)))
}

/// Pick the smallest free page that fits, by area. `pages` entries are
/// (width, height, leased).
fn select_page(pages: &[(u32, u32, bool)], need: (u32, u32)) -> Option<usize> {
    pages
        .iter()
        .enumerate()
        .filter(|(_, &(w, h, leased))| !leased && w >= need.0 && h >= need.1)
        .min_by_key(|(_, &(w, h, _))| w as u64 * h as u64)
        .map(|(i, _)| i)
}

struct Page {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
    lease: u32,
}

/// A leased page: non-zero id plus the page extent actually backing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

pub struct RenderTargetPool {
    format: wgpu::TextureFormat,
    pages: Vec<Page>,
    next_lease: u32,
}

impl RenderTargetPool {
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            pages: Vec::new(),
            next_lease: 1,
        }
    }

    /// Lease a page at least `width` x `height` texels. Returns `None` when
    /// the request exceeds the maximum surface size or the pool is at
    /// capacity with every page leased.
    pub fn take(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Option<Lease> {
        let Some(need) = page_extent(width, height) else {
            debug!(width, height, "target request exceeds max surface size");
            return None;
        };

        let summary: Vec<(u32, u32, bool)> = self
            .pages
            .iter()
            .map(|p| (p.width, p.height, p.lease != 0))
            .collect();

        let index = match select_page(&summary, need) {
            Some(i) => i,
            None => {
                if let Some(free) = self.pages.iter().position(|p| p.lease == 0) {
                    // A free page exists but is too small: grow it in place.
                    // Page sizes only ever increase.
                    let grown = (
                        need.0.max(self.pages[free].width),
                        need.1.max(self.pages[free].height),
                    );
                    debug!(width = grown.0, height = grown.1, "growing target page");
                    self.pages[free] = Self::create_page(device, self.format, grown);
                    free
                } else if self.pages.len() < MAX_PAGES {
                    debug!(width = need.0, height = need.1, "allocating target page");
                    self.pages.push(Self::create_page(device, self.format, need));
                    self.pages.len() - 1
                } else {
                    return None;
                }
            }
        };

        let id = self.next_lease;
        self.next_lease = self.next_lease.wrapping_add(1).max(1);
        let page = &mut self.pages[index];
        page.lease = id;
        Some(Lease {
            id,
            width: page.width,
            height: page.height,
        })
    }

    /// Return a leased page to the pool. Unknown ids are ignored.
    pub fn remove(&mut self, lease: u32) {
        if lease == 0 {
            return;
        }
        if let Some(page) = self.pages.iter_mut().find(|p| p.lease == lease) {
            page.lease = 0;
        }
    }

    /// Release every outstanding lease. Called once per frame.
    pub fn reset(&mut self) {
        for page in &mut self.pages {
            page.lease = 0;
        }
    }

    /// Drop all pages, returning the pool to its empty state.
    pub fn purge(&mut self) {
        self.pages.clear();
    }

    pub fn view(&self, lease: u32) -> Option<&wgpu::TextureView> {
        self.page(lease).map(|p| &p.view)
    }

    pub fn depth_view(&self, lease: u32) -> Option<&wgpu::TextureView> {
        self.page(lease).map(|p| &p.depth_view)
    }

    pub fn texture(&self, lease: u32) -> Option<&wgpu::Texture> {
        self.page(lease).map(|p| &p.texture)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&self, lease: u32) -> Option<&Page> {
        if lease == 0 {
            return None;
        }
        self.pages.iter().find(|p| p.lease == lease)
    }

    fn create_page(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        (width, height): (u32, u32),
    ) -> Page {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Layer Page"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Layer Page Depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth24PlusStencil8,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        Page {
            texture,
            view,
            depth_view,
            width,
            height,
            lease: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_extent_rounds_to_pow2_within_limits() {
        assert_eq!(page_extent(1, 1), Some((16, 16)));
        assert_eq!(page_extent(16, 16), Some((16, 16)));
        assert_eq!(page_extent(17, 100), Some((32, 128)));
        assert_eq!(page_extent(300, 200), Some((512, 256)));
        assert_eq!(page_extent(4096, 4096), Some((4096, 4096)));
        assert_eq!(page_extent(0, 0), Some((16, 16)));
    }

    #[test]
    fn oversized_requests_are_refused_not_cropped() {
        assert_eq!(page_extent(9000, 5000), None);
        assert_eq!(page_extent(4097, 100), None);
        assert_eq!(page_extent(100, 4097), None);
    }

    #[test]
    fn select_page_prefers_smallest_fit() {
        let pages = [
            (512, 512, false),
            (64, 64, false),
            (128, 128, false),
            (64, 64, true),
        ];
        assert_eq!(select_page(&pages, (60, 60)), Some(1));
        assert_eq!(select_page(&pages, (100, 100)), Some(2));
        assert_eq!(select_page(&pages, (400, 100)), Some(0));
        assert_eq!(select_page(&pages, (600, 600)), None);
    }

    #[test]
    fn select_page_skips_leased_pages() {
        let pages = [(64, 64, true), (64, 64, true)];
        assert_eq!(select_page(&pages, (32, 32)), None);
    }
}
