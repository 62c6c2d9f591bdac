//! ISO discovery
//!
//! When a build does not supply `iso_url`, `iso_checksum`, and
//! `iso_checksum_type` itself, boxforge derives them from the distribution's
//! upstream mirrors: the image filename is generated from the release, arch,
//! and image type; the download URL is formed against the configured (or
//! default) base URL; and the checksum is extracted from the mirror's
//! checksum index for the selected image.
//!
//! Each distribution has its own strategy:
//! - **centos**: a bare major release (`7`) is resolved to the current point
//!   release by reading the mirrorlist; with no base URL configured, a
//!   mirror is picked uniformly at random from the isoredirect page.
//! - **debian**: the concrete point release is recovered from the CD-image
//!   directory index.
//! - **ubuntu**: the checksum index itself corrects the point release - if
//!   the generated filename is absent, the release segment of the first
//!   `.iso` entry on the page is adopted and the lookup retried.
//!
//! All requests carry a per-request timeout. Transport and parse failures
//! surface as [`ForgeError::IsoDiscovery`] with the cause chained; on
//! failure no partial state is written to the release record.
//!
//! Every instance is owned by exactly one raw template; there is no shared
//! mutable state between builds.

use crate::constants::{
    CENTOS_ISOREDIRECT_URL, CENTOS_MIRRORLIST_URL, DEBIAN_BASE_URL, HTTP_TIMEOUT, UBUNTU_BASE_URL,
};
use crate::core::error::ForgeError;
use crate::Result;
use rand::Rng;

/// Thin wrapper around the HTTP client used for mirror lookups.
#[derive(Clone, Debug)]
pub struct IsoClient {
    client: reqwest::Client,
}

impl IsoClient {
    /// Builds a client with the per-request timeout applied.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ForgeError::from)?;
        Ok(Self { client })
    }

    /// Fetches `url` and returns the response body as text.
    async fn get_text(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "iso discovery fetch");
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

/// Release information shared by every distribution strategy.
///
/// `release` is the user-supplied value and may be a major-version
/// placeholder; `release_full` is the resolved concrete version string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Release {
    /// Base URL for download-url formation; usage is distro specific.
    pub base_url: String,
    /// Derived ISO filename.
    pub name: String,
    /// Derived download URL for the ISO.
    pub image_url: String,
    /// Checksum extracted from the mirror's checksum index.
    pub checksum: String,
    /// Checksum type, e.g. `sha256`.
    pub checksum_type: String,
    /// Architecture label, e.g. `amd64` or `x86_64`.
    pub arch: String,
    /// Distribution name.
    pub distro: String,
    /// ISO image type, e.g. `server` or `minimal`.
    pub image: String,
    /// User-supplied release, possibly a bare major version.
    pub release: String,
    /// Resolved concrete version string.
    pub release_full: String,
}

impl Release {
    fn require_inputs(&self) -> Result<()> {
        if self.arch.is_empty() {
            return Err(ForgeError::MissingIsoInput {
                field: "arch".to_string(),
            });
        }
        if self.release.is_empty() {
            return Err(ForgeError::MissingIsoInput {
                field: "release".to_string(),
            });
        }
        Ok(())
    }

    fn require_checksum_type(&self) -> Result<()> {
        if self.checksum_type.is_empty() {
            return Err(ForgeError::RequiredSetting {
                key: "iso_checksum_type".to_string(),
            });
        }
        Ok(())
    }
}

/// The per-distribution ISO release object, one per raw template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseIso {
    /// CentOS strategy.
    CentOs(Release),
    /// Debian strategy.
    Debian(Release),
    /// Ubuntu strategy.
    Ubuntu(Release),
}

impl ReleaseIso {
    /// Constructs the strategy matching `distro`, filling the distro's
    /// default base URL when the configuration does not supply one.
    pub fn new(
        distro: &str,
        release: &str,
        arch: &str,
        image: &str,
        base_url: &str,
    ) -> Result<Self> {
        let mut rel = Release {
            base_url: base_url.to_string(),
            arch: arch.to_string(),
            distro: distro.to_string(),
            image: image.to_string(),
            release: release.to_string(),
            ..Release::default()
        };
        match distro {
            "centos" => Ok(ReleaseIso::CentOs(rel)),
            "debian" => {
                if rel.base_url.is_empty() {
                    rel.base_url = DEBIAN_BASE_URL.to_string();
                }
                Ok(ReleaseIso::Debian(rel))
            }
            "ubuntu" => {
                if rel.base_url.is_empty() {
                    rel.base_url = UBUNTU_BASE_URL.to_string();
                }
                Ok(ReleaseIso::Ubuntu(rel))
            }
            _ => Err(ForgeError::UnsupportedDistro {
                distro: distro.to_string(),
            }),
        }
    }

    /// The shared release record.
    pub fn release(&self) -> &Release {
        match self {
            ReleaseIso::CentOs(r) | ReleaseIso::Debian(r) | ReleaseIso::Ubuntu(r) => r,
        }
    }

    fn release_mut(&mut self) -> &mut Release {
        match self {
            ReleaseIso::CentOs(r) | ReleaseIso::Debian(r) | ReleaseIso::Ubuntu(r) => r,
        }
    }

    /// The derived download URL; empty until [`Self::set_iso_info`] ran.
    pub fn image_url(&self) -> &str {
        &self.release().image_url
    }

    /// Resolves the full release, filename, download URL, and checksum for
    /// the selected release/arch/image.
    ///
    /// `checksum_type` comes from the build's settings (`iso_checksum_type`).
    /// On success the record is updated atomically; on failure it is left
    /// untouched and the cause surfaces as [`ForgeError::IsoDiscovery`].
    pub async fn set_iso_info(&mut self, client: &IsoClient, checksum_type: &str) -> Result<()> {
        let mut work = self.release().clone();
        work.checksum_type = checksum_type.to_lowercase();
        work.require_inputs()?;
        let result = match self {
            ReleaseIso::CentOs(_) => centos::set_iso_info(client, &mut work).await,
            ReleaseIso::Debian(_) => debian::set_iso_info(client, &mut work).await,
            ReleaseIso::Ubuntu(_) => ubuntu::set_iso_info(client, &mut work).await,
        };
        match result {
            Ok(()) => {
                *self.release_mut() = work;
                Ok(())
            }
            Err(e @ ForgeError::ChecksumNotFound { .. }) => Err(e),
            Err(e @ ForgeError::RequiredSetting { .. }) => Err(e),
            Err(e @ ForgeError::MissingIsoInput { .. }) => Err(e),
            Err(e) => Err(e.into_iso_discovery()),
        }
    }

    /// Maps distro, arch, and builder kind to the guest OS type string the
    /// virtualization platform expects.
    pub fn os_type(&self, builder_kind: &str) -> Result<String> {
        let rel = self.release();
        let family = OsTypeFamily::from_kind(builder_kind);
        let sixty_four = matches!(rel.arch.as_str(), "amd64" | "x86_64");
        let os = match (self, family) {
            (ReleaseIso::CentOs(_), OsTypeFamily::VmWare) => {
                if sixty_four {
                    "centos-64"
                } else {
                    "centos-32"
                }
            }
            (ReleaseIso::CentOs(_), OsTypeFamily::VirtualBox) => {
                if sixty_four {
                    "RedHat_64"
                } else {
                    "RedHat_32"
                }
            }
            (ReleaseIso::Debian(_), OsTypeFamily::VmWare) => {
                if sixty_four {
                    "debian-64"
                } else {
                    "debian-32"
                }
            }
            (ReleaseIso::Debian(_), OsTypeFamily::VirtualBox) => {
                if sixty_four {
                    "Debian_64"
                } else {
                    "Debian_32"
                }
            }
            (ReleaseIso::Ubuntu(_), OsTypeFamily::VmWare) => {
                if sixty_four {
                    "ubuntu-64"
                } else {
                    "ubuntu-32"
                }
            }
            (ReleaseIso::Ubuntu(_), OsTypeFamily::VirtualBox) => {
                if sixty_four {
                    "Ubuntu_64"
                } else {
                    "Ubuntu_32"
                }
            }
            (_, OsTypeFamily::Other) => "",
        };
        if os.is_empty() {
            return Err(ForgeError::UnsupportedKind {
                kind: builder_kind.to_string(),
            });
        }
        Ok(os.to_string())
    }
}

enum OsTypeFamily {
    VmWare,
    VirtualBox,
    Other,
}

impl OsTypeFamily {
    fn from_kind(kind: &str) -> Self {
        match kind {
            "vmware-iso" | "vmware-vmx" => OsTypeFamily::VmWare,
            "virtualbox-iso" | "virtualbox-ovf" => OsTypeFamily::VirtualBox,
            _ => OsTypeFamily::Other,
        }
    }
}

/// Extracts the checksum matching `filename` from a plain-text checksum
/// index of `<hex> <whitespace> <filename>` lines.
///
/// Tolerates a UTF-8 BOM and trailing whitespace.
fn find_checksum(page: &str, filename: &str) -> Option<String> {
    let page = page.trim_start_matches('\u{feff}');
    for line in page.lines() {
        let line = line.trim_end();
        if !line.contains(filename) {
            continue;
        }
        if let Some(checksum) = line.split_whitespace().next() {
            return Some(checksum.to_string());
        }
    }
    None
}

/// Collects every `href` attribute value from an HTML page.
///
/// The pages consumed here (mirrorlist redirects, directory indexes) are
/// attribute-regular; a full DOM parse buys nothing.
fn extract_hrefs(page: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    let mut rest = page;
    while let Some(pos) = rest.find("href=\"") {
        rest = &rest[pos + 6..];
        match rest.find('"') {
            Some(end) => {
                hrefs.push(rest[..end].to_string());
                rest = &rest[end..];
            }
            None => break,
        }
    }
    hrefs
}

fn append_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

mod centos {
    use super::*;

    pub(super) async fn set_iso_info(client: &IsoClient, rel: &mut Release) -> Result<()> {
        set_release_info(client, rel).await?;
        rel.name = format!(
            "CentOS-{}-{}-{}.iso",
            rel.release_full, rel.arch, rel.image
        );
        set_iso_url(client, rel).await?;
        rel.require_checksum_type()?;
        let page = client.get_text(&checksum_url(rel)).await?;
        rel.checksum = find_checksum(&page, &rel.name).ok_or_else(|| {
            ForgeError::ChecksumNotFound {
                filename: rel.name.clone(),
            }
        })?;
        Ok(())
    }

    /// A release of `N.M` is already concrete; a bare `N` is resolved
    /// against the mirrorlist.
    async fn set_release_info(client: &IsoClient, rel: &mut Release) -> Result<()> {
        if rel.release.contains('.') {
            rel.release_full = rel.release.clone();
            rel.release = rel
                .release
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string();
            return Ok(());
        }
        let url = format!(
            "{}?release={}&arch={}&repo=os",
            CENTOS_MIRRORLIST_URL, rel.release, rel.arch
        );
        let page = client.get_text(&url).await?;
        rel.release_full = parse_mirrorlist_release(&page)?;
        Ok(())
    }

    /// The mirrorlist body is one mirror URL per line; the release number is
    /// the 4th path segment from the end of the first line.
    pub(super) fn parse_mirrorlist_release(page: &str) -> Result<String> {
        let first = page
            .trim_start_matches('\u{feff}')
            .lines()
            .next()
            .unwrap_or_default()
            .trim();
        let parts: Vec<&str> = first.split('/').collect();
        if parts.len() < 4 {
            return Err(ForgeError::Other {
                message: format!("unexpected mirrorlist response: {first:?}"),
            });
        }
        Ok(parts[parts.len() - 4].to_string())
    }

    async fn set_iso_url(client: &IsoClient, rel: &mut Release) -> Result<()> {
        if !rel.base_url.is_empty() {
            rel.image_url = format!(
                "{}{}/isos/{}/{}",
                append_slash(&rel.base_url),
                rel.release_full,
                rel.arch,
                rel.name
            );
            return Ok(());
        }
        let redirect = format!(
            "{}{}/isos/{}/",
            CENTOS_ISOREDIRECT_URL, rel.release, rel.arch
        );
        let page = client.get_text(&redirect).await?;
        let mirror = pick_mirror(&page, &rel.arch)?;
        rel.image_url = format!("{}{}", append_slash(mirror.trim()), rel.name);
        Ok(())
    }

    /// Picks a mirror uniformly at random from the isoredirect anchor list.
    /// FTP mirrors are skipped; checksums cannot be fetched over ftp.
    pub(super) fn pick_mirror(page: &str, arch: &str) -> Result<String> {
        let candidates: Vec<String> = extract_hrefs(page)
            .into_iter()
            .filter(|href| href.contains(arch) && !href.starts_with("ftp://"))
            .collect();
        if candidates.is_empty() {
            return Err(ForgeError::Other {
                message: "no usable mirror urls found on the isoredirect page".to_string(),
            });
        }
        let idx = rand::rng().random_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }

    /// The checksum index is a sibling of the ISO itself.
    pub(super) fn checksum_url(rel: &Release) -> String {
        let base = rel
            .image_url
            .strip_suffix(&rel.name)
            .unwrap_or(&rel.image_url);
        format!("{}{}sum.txt", base, rel.checksum_type)
    }
}

mod debian {
    use super::*;

    pub(super) async fn set_iso_info(client: &IsoClient, rel: &mut Release) -> Result<()> {
        if rel.release_full.is_empty() {
            let page = client.get_text(&rel.base_url).await?;
            rel.release_full = parse_full_release(&page, &rel.release)?;
        }
        rel.name = format!(
            "debian-{}-{}-{}.iso",
            rel.release_full, rel.arch, rel.image
        );
        rel.image_url = format!(
            "{}{}/{}/iso-cd/{}",
            append_slash(&rel.base_url),
            rel.release_full,
            rel.arch,
            rel.name
        );
        rel.require_checksum_type()?;
        let sums_url = format!(
            "{}{}/amd64/iso-cd/{}SUMS",
            append_slash(&rel.base_url),
            rel.release_full,
            rel.checksum_type.to_uppercase()
        );
        let page = client.get_text(&sums_url).await?;
        rel.checksum = find_checksum(&page, &rel.name).ok_or_else(|| {
            ForgeError::ChecksumNotFound {
                filename: rel.name.clone(),
            }
        })?;
        Ok(())
    }

    /// The directory index anchors carry the point release: the text
    /// following `a href="<release>` up to the closing quote begins with the
    /// concrete version string, e.g. `7.8.0`.
    pub(super) fn parse_full_release(page: &str, release: &str) -> Result<String> {
        let marker = format!("a href=\"{release}");
        let pos = page.find(&marker).ok_or_else(|| ForgeError::Other {
            message: format!("release {release} not present in the debian directory index"),
        })?;
        let rest = &page[pos + "a href=\"".len()..];
        let end = rest.find('"').unwrap_or(rest.len());
        let href = &rest[..end];
        if href.len() < 5 {
            return Err(ForgeError::Other {
                message: format!("unexpected debian release link {href:?}"),
            });
        }
        Ok(href[..5].to_string())
    }
}

mod ubuntu {
    use super::*;

    pub(super) async fn set_iso_info(client: &IsoClient, rel: &mut Release) -> Result<()> {
        if rel.release_full.is_empty() {
            rel.release_full = rel.release.clone();
        }
        rel.name = iso_name(rel);
        rel.require_checksum_type()?;
        let sums_url = format!(
            "{}{}/{}SUMS",
            append_slash(&rel.base_url),
            rel.release,
            rel.checksum_type.to_uppercase()
        );
        let page = client.get_text(&sums_url).await?;
        match find_checksum(&page, &rel.name) {
            Some(sum) => rel.checksum = sum,
            None => {
                // LTS point releases increment the version in the filename;
                // adopt the release of the first .iso entry and retry.
                if let Some(full) = point_release_from_page(&page) {
                    rel.release_full = full;
                    rel.name = iso_name(rel);
                }
                rel.checksum = find_checksum(&page, &rel.name).ok_or_else(|| {
                    ForgeError::ChecksumNotFound {
                        filename: rel.name.clone(),
                    }
                })?;
            }
        }
        rel.image_url = format!("{}{}/{}", append_slash(&rel.base_url), rel.release, rel.name);
        Ok(())
    }

    pub(super) fn iso_name(rel: &Release) -> String {
        format!(
            "ubuntu-{}-{}-{}.iso",
            rel.release_full, rel.image, rel.arch
        )
    }

    /// Extracts the release segment of the first `.iso` filename on the
    /// checksum page, e.g. `14.04.4` from `ubuntu-14.04.4-server-amd64.iso`.
    pub(super) fn point_release_from_page(page: &str) -> Option<String> {
        let pos = page.find(".iso")?;
        let head = &page[..pos];
        let start = head
            .rfind(|c: char| c.is_whitespace() || c == '*')
            .map_or(0, |i| i + 1);
        let filename = &head[start..];
        let mut parts = filename.split('-');
        let _prefix = parts.next()?;
        let release = parts.next()?;
        if release.is_empty() {
            return None;
        }
        Some(release.to_string())
    }
}
