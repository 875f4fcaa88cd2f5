//! Mel projection plus residual PostNet refinement.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::postnet::{PostNet, PostNetConfig};

#[derive(Debug, Clone)]
pub struct SpectralHead {
    mel_linear: nn::Linear,
    postnet: PostNet,
}

impl SpectralHead {
    /// Parameters at `mel_linear.*` and `postnet.*` under `vb`.
    pub fn new(decoder_hidden: usize, postnet: &PostNetConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            mel_linear: nn::linear(decoder_hidden, postnet.n_mel_channels, vb.pp("mel_linear"))?,
            postnet: PostNet::new(postnet, vb.pp("postnet"))?,
        })
    }

    /// `[B, T, H]` → `(mel, postnet_mel)`, both `[B, T, n_mel]`.
    ///
    /// `postnet_mel = PostNet(mel) + mel`.
    pub fn forward(&self, decoded: &Tensor) -> Result<(Tensor, Tensor)> {
        let mel = self.mel_linear.forward(decoded)?;
        let postnet_mel = (self.postnet.forward(&mel)? + &mel)?;
        Ok((mel, postnet_mel))
    }

    pub fn postnet(&self) -> &PostNet {
        &self.postnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_postnet_output_is_residual() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let cfg = PostNetConfig {
            n_mel_channels: 6,
            embedding_dim: 12,
            ..Default::default()
        };
        let head = SpectralHead::new(16, &cfg, vb).unwrap();
        let decoded = Tensor::randn(0f32, 1.0, (2, 9, 16), &dev).unwrap();
        let (mel, postnet_mel) = head.forward(&decoded).unwrap();
        assert_eq!(mel.dims(), &[2, 9, 6]);
        assert_eq!(postnet_mel.dims(), &[2, 9, 6]);

        let expected = (head.postnet().forward(&mel).unwrap() + &mel).unwrap();
        assert_eq!(
            postnet_mel.to_vec3::<f32>().unwrap(),
            expected.to_vec3::<f32>().unwrap()
        );
    }
}
