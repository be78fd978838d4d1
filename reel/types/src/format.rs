/*!
    Pixel formats, image orientation, and color metadata.
*/

/**
    Video pixel formats.

    This is the subset of formats the pipeline moves between its stages:
    planar/semi-planar YUV on the decode side, packed RGBA/BGRA on the
    render and encode side.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (common decoder output)
    Yuv420p,
    /// Semi-planar YUV 4:2:0, 12bpp (common hardware decoder output)
    Nv12,
    /// Packed BGRA, 32bpp (writer-native format)
    Bgra,
    /// Packed RGBA, 32bpp (texture-native format)
    Rgba,
}

impl PixelFormat {
    /**
        Returns the number of bits per pixel for this format.

        For planar formats, this is the average bits per pixel.
    */
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Yuv420p | Self::Nv12 => 12,
            Self::Bgra | Self::Rgba => 32,
        }
    }

    /**
        Returns true if this is a planar (or semi-planar) format.
    */
    pub const fn is_planar(self) -> bool {
        match self {
            Self::Yuv420p | Self::Nv12 => true,
            Self::Bgra | Self::Rgba => false,
        }
    }

    /**
        Number of planes the format stores.
    */
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p => 3,
            Self::Nv12 => 2,
            Self::Bgra | Self::Rgba => 1,
        }
    }
}

/**
    Media kind of a track or sample.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/**
    Logical size in pixels.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /**
        The size with width and height exchanged.
    */
    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/**
    Display orientation of an image.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/**
    Rotation (and optional flip) taking one orientation to another.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rotation {
    NoRotation,
    RotateCounterclockwise,
    RotateClockwise,
    Rotate180,
    FlipHorizontally,
    FlipVertically,
    RotateClockwiseAndFlipVertically,
    RotateClockwiseAndFlipHorizontally,
}

impl Rotation {
    /**
        True if applying this rotation exchanges width and height.
    */
    pub const fn flips_dimensions(self) -> bool {
        match self {
            Self::NoRotation | Self::Rotate180 | Self::FlipHorizontally | Self::FlipVertically => {
                false
            }
            Self::RotateCounterclockwise
            | Self::RotateClockwise
            | Self::RotateClockwiseAndFlipVertically
            | Self::RotateClockwiseAndFlipHorizontally => true,
        }
    }
}

impl ImageOrientation {
    /**
        The rotation that takes an image in this orientation to
        `target`.
    */
    pub const fn rotation_needed(self, target: ImageOrientation) -> Rotation {
        use ImageOrientation::*;
        match (self, target) {
            (Portrait, Portrait)
            | (PortraitUpsideDown, PortraitUpsideDown)
            | (LandscapeLeft, LandscapeLeft)
            | (LandscapeRight, LandscapeRight) => Rotation::NoRotation,
            (Portrait, PortraitUpsideDown) | (PortraitUpsideDown, Portrait) => Rotation::Rotate180,
            (LandscapeLeft, LandscapeRight) | (LandscapeRight, LandscapeLeft) => {
                Rotation::Rotate180
            }
            (Portrait, LandscapeLeft) | (LandscapeRight, Portrait) => {
                Rotation::RotateCounterclockwise
            }
            (LandscapeLeft, Portrait) | (Portrait, LandscapeRight) => Rotation::RotateClockwise,
            (PortraitUpsideDown, LandscapeLeft) | (LandscapeRight, PortraitUpsideDown) => {
                Rotation::RotateClockwise
            }
            (LandscapeLeft, PortraitUpsideDown) | (PortraitUpsideDown, LandscapeRight) => {
                Rotation::RotateCounterclockwise
            }
        }
    }
}

/**
    Color primaries of a pixel buffer.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ColorPrimaries {
    Itu709_2,
    SmpteC,
}

/**
    YCbCr conversion matrix of a pixel buffer.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum YcbcrMatrix {
    Itu601_4,
    Itu709_2,
}

/**
    Transfer function of a pixel buffer.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TransferFunction {
    Itu709_2,
    Smpte240M1995,
}

/**
    Color metadata attached to a pixel buffer before it reaches the
    encoder. Set once, on the first buffer of a session.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorAttachments {
    pub primaries: ColorPrimaries,
    pub ycbcr_matrix: YcbcrMatrix,
    pub transfer_function: TransferFunction,
    pub should_propagate: bool,
}

impl Default for ColorAttachments {
    fn default() -> Self {
        Self {
            primaries: ColorPrimaries::Itu709_2,
            ycbcr_matrix: YcbcrMatrix::Itu601_4,
            transfer_function: TransferFunction::Itu709_2,
            should_propagate: true,
        }
    }
}
