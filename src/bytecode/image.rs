use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bytecode::compile::Bytecode;
use crate::bytecode::op::Instructions;
use crate::lang::object::{CompiledFunction, Object};

// =============================================================================
// IMAGE - on-disk form of a compiled program
// =============================================================================

pub const MAGIC: [u8; 4] = *b"WICK";
pub const VERSION: u32 = 1;

/// A constant-pool entry as it appears on disk. The compiler only ever emits
/// integers, strings and function templates into the pool, so the image
/// format is restricted to those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ImageConstant {
    Integer(i64),
    Str(String),
    Function {
        instructions: Instructions,
        num_locals: usize,
        num_params: usize,
    },
}

/// A serialized compiled program: magic, format version, main instruction
/// stream, constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    magic: [u8; 4],
    version: u32,
    instructions: Instructions,
    constants: Vec<ImageConstant>,
}

#[derive(Debug)]
pub enum ImageError {
    /// The constant pool held a value the image format cannot carry.
    UnsupportedConstant(&'static str),
    InvalidMagic,
    UnsupportedVersion(u32),
    Encoding(postcard::Error),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::UnsupportedConstant(kind) => {
                write!(f, "cannot serialize a {} constant", kind)
            }
            ImageError::InvalidMagic => write!(f, "invalid magic number"),
            ImageError::UnsupportedVersion(v) => write!(f, "unsupported image version: {}", v),
            ImageError::Encoding(e) => write!(f, "encoding error: {}", e),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<postcard::Error> for ImageError {
    fn from(e: postcard::Error) -> Self {
        ImageError::Encoding(e)
    }
}

impl Image {
    pub fn from_bytecode(bytecode: &Bytecode) -> Result<Image, ImageError> {
        let constants = bytecode
            .constants
            .iter()
            .map(|constant| match constant {
                Object::Integer(n) => Ok(ImageConstant::Integer(*n)),
                Object::Str(s) => Ok(ImageConstant::Str(s.as_ref().clone())),
                Object::CompiledFunction(function) => Ok(ImageConstant::Function {
                    instructions: function.instructions.clone(),
                    num_locals: function.num_locals,
                    num_params: function.num_params,
                }),
                other => Err(ImageError::UnsupportedConstant(other.type_name())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Image {
            magic: MAGIC,
            version: VERSION,
            instructions: bytecode.instructions.clone(),
            constants,
        })
    }

    pub fn into_bytecode(self) -> Bytecode {
        let constants = self
            .constants
            .into_iter()
            .map(|constant| match constant {
                ImageConstant::Integer(n) => Object::Integer(n),
                ImageConstant::Str(s) => Object::str(s),
                ImageConstant::Function {
                    instructions,
                    num_locals,
                    num_params,
                } => Object::CompiledFunction(Rc::new(CompiledFunction {
                    instructions,
                    num_locals,
                    num_params,
                    free: Vec::new(),
                })),
            })
            .collect();

        Bytecode {
            instructions: self.instructions,
            constants,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Image, ImageError> {
        let image: Image = postcard::from_bytes(bytes)?;
        if image.magic != MAGIC {
            return Err(ImageError::InvalidMagic);
        }
        if image.version != VERSION {
            return Err(ImageError::UnsupportedVersion(image.version));
        }
        Ok(image)
    }
}

/// Serialize a compiled program.
pub fn encode(bytecode: &Bytecode) -> Result<Vec<u8>, ImageError> {
    Image::from_bytecode(bytecode)?.to_bytes()
}

/// Deserialize a compiled program.
pub fn decode(bytes: &[u8]) -> Result<Bytecode, ImageError> {
    Ok(Image::from_bytes(bytes)?.into_bytecode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::{Op, make};

    fn sample_bytecode() -> Bytecode {
        let function = CompiledFunction {
            instructions: Instructions::from(make(Op::Return, &[])),
            num_locals: 2,
            num_params: 1,
            free: Vec::new(),
        };
        Bytecode {
            instructions: Instructions::from(
                [make(Op::Constant, &[0]), make(Op::Pop, &[])].concat(),
            ),
            constants: vec![
                Object::Integer(42),
                Object::str("wick"),
                Object::CompiledFunction(Rc::new(function)),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let bytecode = sample_bytecode();
        let bytes = encode(&bytecode).unwrap();
        let restored = decode(&bytes).unwrap();
        assert_eq!(restored, bytecode);
    }

    #[test]
    fn test_rejects_runtime_only_constants() {
        let bytecode = Bytecode {
            instructions: Instructions::new(),
            constants: vec![Object::array(vec![])],
        };
        let err = encode(&bytecode).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedConstant("array")));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut image = Image::from_bytecode(&sample_bytecode()).unwrap();
        image.magic = *b"NOPE";
        let bytes = image.to_bytes().unwrap();
        assert!(matches!(
            Image::from_bytes(&bytes),
            Err(ImageError::InvalidMagic)
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut image = Image::from_bytecode(&sample_bytecode()).unwrap();
        image.version = 99;
        let bytes = image.to_bytes().unwrap();
        assert!(matches!(
            Image::from_bytes(&bytes),
            Err(ImageError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_garbage_input_fails_cleanly() {
        assert!(matches!(
            Image::from_bytes(&[1, 2, 3]),
            Err(ImageError::Encoding(_)) | Err(ImageError::InvalidMagic)
        ));
    }
}
