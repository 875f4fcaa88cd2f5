//! Speaker identity conditioning.
//!
//! A multi-speaker model owns an `Embedding(n_speakers, H)` whose vector is added
//! to every encoder time step (padding included). Whether the table exists is
//! decided once at construction.

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{DType, Module, Tensor};
use candle_nn::{self as nn, VarBuilder};

use crate::{Error, Result};

/// Speaker name → embedding index, as written to `speakers.json`.
#[derive(Debug, Clone, Default)]
pub struct SpeakerRegistry {
    speakers: BTreeMap<String, u32>,
}

impl SpeakerRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let speakers: BTreeMap<String, u32> = serde_json::from_str(&text)?;
        Ok(Self { speakers })
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.speakers.get(name).copied()
    }
}

#[derive(Debug, Clone)]
pub enum SpeakerConditioner {
    /// Single-speaker model: the encoder output passes through unchanged.
    Disabled,
    Enabled {
        speaker_emb: nn::Embedding,
        n_speakers: usize,
    },
}

impl SpeakerConditioner {
    /// Build the conditioner; the table lives at `speaker_emb.weight` under `vb`.
    pub fn new(
        multi_speaker: bool,
        n_speakers: usize,
        hidden: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if !multi_speaker {
            return Ok(Self::Disabled);
        }
        if n_speakers == 0 {
            return Err(Error::Config(
                "multi-speaker model needs at least one registered speaker".to_string(),
            ));
        }
        tracing::info!("speaker embedding: {n_speakers} speakers");
        Ok(Self::Enabled {
            speaker_emb: nn::embedding(n_speakers, hidden, vb.pp("speaker_emb"))?,
            n_speakers,
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Add each utterance's speaker vector across all time steps.
    ///
    /// - `x`: `[B, S, H]`
    /// - `speakers`: `[B]` indices; required iff the model is multi-speaker
    pub fn forward(&self, x: &Tensor, speakers: Option<&Tensor>) -> Result<Tensor> {
        match (self, speakers) {
            (Self::Disabled, None) => Ok(x.clone()),
            (Self::Disabled, Some(_)) => Err(Error::Config(
                "speaker ids supplied to a single-speaker model".to_string(),
            )),
            (Self::Enabled { .. }, None) => Err(Error::Config(
                "multi-speaker model requires speaker ids".to_string(),
            )),
            (
                Self::Enabled {
                    speaker_emb,
                    n_speakers,
                },
                Some(ids),
            ) => {
                let batch = x.dim(0)?;
                if ids.dims() != [batch] {
                    return Err(Error::ShapeMismatch(format!(
                        "speaker ids {:?} do not match batch {batch}",
                        ids.dims()
                    )));
                }
                let ids = ids.to_dtype(DType::U32)?;
                if let Some(&bad) = ids
                    .to_vec1::<u32>()?
                    .iter()
                    .find(|&&id| id as usize >= *n_speakers)
                {
                    return Err(Error::Config(format!(
                        "speaker id {bad} out of range for {n_speakers} speakers"
                    )));
                }
                let emb = speaker_emb.forward(&ids)?.unsqueeze(1)?; // [B, 1, H]
                Ok(x.broadcast_add(&emb)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_registry_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speakers.json");
        std::fs::write(&path, r#"{"p225": 0, "p226": 1, "p227": 2}"#).unwrap();
        let reg = SpeakerRegistry::load(&path).unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.index_of("p226"), Some(1));
        assert_eq!(reg.index_of("nobody"), None);
    }

    #[test]
    fn test_registry_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpeakerRegistry::load(dir.path().join("speakers.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_disabled_is_identity() {
        let dev = Device::Cpu;
        let cond =
            SpeakerConditioner::new(false, 0, 4, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        assert!(!cond.is_enabled());
        let x = Tensor::randn(0f32, 1.0, (2, 3, 4), &dev).unwrap();
        let y = cond.forward(&x, None).unwrap();
        assert_eq!(
            x.to_vec3::<f32>().unwrap(),
            y.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn test_speaker_ids_must_match_configuration() {
        let dev = Device::Cpu;
        let x = Tensor::zeros((1, 3, 4), DType::F32, &dev).unwrap();
        let ids = Tensor::new(&[0u32], &dev).unwrap();

        let single =
            SpeakerConditioner::new(false, 0, 4, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        assert!(matches!(single.forward(&x, Some(&ids)), Err(Error::Config(_))));

        let multi =
            SpeakerConditioner::new(true, 2, 4, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        assert!(matches!(multi.forward(&x, None), Err(Error::Config(_))));

        let out_of_range = Tensor::new(&[5u32], &dev).unwrap();
        assert!(matches!(multi.forward(&x, Some(&out_of_range)), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_registry_rejected() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(SpeakerConditioner::new(true, 0, 4, vb).is_err());
    }

    #[test]
    fn test_offset_broadcast_over_time() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let cond = SpeakerConditioner::new(true, 3, 4, vb).unwrap();
        let x = Tensor::zeros((2, 5, 4), DType::F32, &dev).unwrap();
        let ids = Tensor::new(&[2u32, 0], &dev).unwrap();
        let y: Vec<Vec<Vec<f32>>> = cond.forward(&x, Some(&ids)).unwrap().to_vec3().unwrap();
        for u in 0..2 {
            for t in 1..5 {
                assert_eq!(y[u][t], y[u][0], "utterance {u} step {t}");
            }
        }
        assert_ne!(y[0][0], y[1][0]);
    }
}
