use crate::images::ImageSummary;

/// Restrictions applied to search and filter results on top of name matching.
///
/// Empty OS and architecture lists accept every platform; `None` for the boolean restrictions
/// accepts both states.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub os: Vec<String>,
    pub arch: Vec<String>,
    pub has_to_be_signed: Option<bool>,
    pub is_starred: Option<bool>,
    pub is_bookmarked: Option<bool>,
}

fn any_eq_ignore_case<'a, I>(accepted: &[String], values: I) -> bool
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    accepted.is_empty()
        || accepted.iter().any(|a| {
            values
                .clone()
                .into_iter()
                .any(|v| v.eq_ignore_ascii_case(a))
        })
}

impl Filter {
    pub fn with_os<S: Into<String>>(mut self, os: S) -> Self {
        self.os.push(os.into());
        self
    }

    pub fn with_arch<S: Into<String>>(mut self, arch: S) -> Self {
        self.arch.push(arch.into());
        self
    }

    pub fn has_platform_restriction(&self) -> bool {
        !self.os.is_empty() || !self.arch.is_empty()
    }

    /// Whether a single image runs on an accepted platform.
    pub fn accepts_image(&self, image: &ImageSummary) -> bool {
        any_eq_ignore_case(&self.os, [image.os.as_str()])
            && any_eq_ignore_case(&self.arch, [image.arch.as_str()])
    }

    /// Whether any of the images of a tag runs on an accepted platform.
    ///
    /// A tag pointing at an index passes when at least one constituent image passes.
    pub fn accepts_tag(&self, images: &[ImageSummary]) -> bool {
        !self.has_platform_restriction() || images.iter().any(|i| self.accepts_image(i))
    }

    /// Whether the platforms found across all images of a repository intersect the accepted OS
    /// list and, independently, the accepted architecture list.
    pub fn accepts_repo(&self, images: &[ImageSummary]) -> bool {
        if !self.has_platform_restriction() {
            return true;
        }
        any_eq_ignore_case(&self.os, images.iter().map(|i| i.os.as_str()))
            && any_eq_ignore_case(&self.arch, images.iter().map(|i| i.arch.as_str()))
    }

    /// Whether signature, star and bookmark state satisfy the boolean restrictions.
    pub fn accepts_state(&self, is_signed: bool, is_starred: bool, is_bookmarked: bool) -> bool {
        fn matches(wanted: Option<bool>, actual: bool) -> bool {
            wanted.map_or(true, |w| w == actual)
        }

        matches(self.has_to_be_signed, is_signed)
            && matches(self.is_starred, is_starred)
            && matches(self.is_bookmarked, is_bookmarked)
    }
}
