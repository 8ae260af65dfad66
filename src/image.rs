//! The image function surface exposed to scripts (the Lua `Image` proxy).
//!
//! Template matching and OCR are external collaborators: they are consumed
//! as pure functions taking and returning image and point values. This
//! module provides the capability shape plus the operations that need no
//! external engine (`open`); an analysis backend replaces
//! [`ImageSurface::default`] by construction with real `find`/`ocr`
//! functions.

use std::sync::Arc;

use crate::device::{Capability, DeviceError, MethodSpec, Outcome, ParamSpec};
use crate::value::{Image, Point, Value};

/// Signature of an externally-supplied analysis function: raw arguments in,
/// one value out.
pub type ImageFn = Arc<dyn Fn(&[Value]) -> Result<Value, DeviceError> + Send + Sync>;

/// Name-indexed image operations. `open` and `crop` are built in; `find`
/// (template matching, returning a point) and `ocr` (returning a list of
/// `(text, point)` pairs) are plugged in by the embedding application.
#[derive(Default)]
pub struct ImageSurface {
    find: Option<ImageFn>,
    ocr: Option<ImageFn>,
}

impl ImageSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_find(mut self, f: ImageFn) -> Self {
        self.find = Some(f);
        self
    }

    pub fn with_ocr(mut self, f: ImageFn) -> Self {
        self.ocr = Some(f);
        self
    }

    fn open(args: &[Value]) -> Result<Value, DeviceError> {
        let path = match args.first() {
            Some(Value::Str(path)) => path,
            _ => return Err(DeviceError::new("open expects a path string")),
        };
        let bytes = std::fs::read(path)
            .map_err(|e| DeviceError::new(format!("cannot open image {path}: {e}")))?;
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        Ok(Value::Image(Image::new(bytes, name)))
    }

    // Cropping needs a decoder, which lives with the external analysis
    // backend; without one the bytes pass through untouched apart from the
    // recorded crop name.
    fn crop(args: &[Value]) -> Result<Value, DeviceError> {
        let image = match args.first() {
            Some(Value::Image(image)) => image,
            _ => return Err(DeviceError::new("crop expects an image")),
        };
        let coords: Vec<f64> = args.iter().skip(1).map(Value::as_number).collect();
        let [x1, y1, x2, y2] = coords.as_slice() else {
            return Err(DeviceError::new("crop expects x1 y1 x2 y2"));
        };
        let mut cropped = image.clone();
        cropped.name = Some(format!(
            "{}[{x1} {y1} {x2} {y2}]",
            image.name.as_deref().unwrap_or("image"),
        ));
        Ok(Value::Image(cropped))
    }
}

impl Capability for ImageSurface {
    fn describe(&self, method: &str) -> Option<MethodSpec> {
        match method {
            "open" => Some(MethodSpec::fixed(vec![ParamSpec::required("path")])),
            "crop" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("image"),
                ParamSpec::required("x1"),
                ParamSpec::required("y1"),
                ParamSpec::required("x2"),
                ParamSpec::required("y2"),
            ])),
            "find" | "ocr" => Some(MethodSpec::variadic()),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Outcome, DeviceError> {
        let value = match method {
            "open" => Self::open(&args)?,
            "crop" => Self::crop(&args)?,
            "find" => match &self.find {
                Some(f) => f(&args)?,
                None => return Err(DeviceError::new("no template-matching backend is wired")),
            },
            "ocr" => match &self.ocr {
                Some(f) => f(&args)?,
                None => return Err(DeviceError::new("no OCR backend is wired")),
            },
            _ => return Err(DeviceError::new(format!("no image operation {method}"))),
        };
        Ok(Outcome::value(value))
    }
}

/// Convenience constructor for an OCR result entry: `(text, point)`.
pub fn ocr_entry(text: impl Into<String>, point: Point) -> Value {
    Value::List(vec![Value::Str(text.into()), Value::Point(point)])
}
