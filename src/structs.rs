use crate::{background::Background, gallery::Gallery};

pub struct Context {
    pub gallery: Gallery,
    pub default_background: Background,
    pub jpeg_quality: u8,
}
