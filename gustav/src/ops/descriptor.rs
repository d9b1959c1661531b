use serde::{Deserialize, Serialize};

/// Whether an input operand is used as stored or transposed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputOption {
    #[default]
    Default,
    Transpose,
}

/// How the mask is read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskOption {
    /// Presence alone counts; stored values are ignored.
    pub structural: bool,
    /// The mask selects where *not* to write.
    pub complement: bool,
}

/// Whether the output is cleared before the masked write-back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputOption {
    #[default]
    Default,
    Replace,
}

/// Algorithm hint for matrix multiply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxbMethod {
    #[default]
    Default,
    Gustavson,
    Dot,
    Heap,
}

/// The per-call option block every operator takes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub inp0: InputOption,
    pub inp1: InputOption,
    pub mask: MaskOption,
    pub outp: OutputOption,
    pub axb_method: AxbMethod,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transpose_inp0(mut self) -> Self {
        self.inp0 = InputOption::Transpose;
        self
    }

    pub fn transpose_inp1(mut self) -> Self {
        self.inp1 = InputOption::Transpose;
        self
    }

    pub fn structural_mask(mut self) -> Self {
        self.mask.structural = true;
        self
    }

    pub fn complement_mask(mut self) -> Self {
        self.mask.complement = true;
        self
    }

    pub fn replace(mut self) -> Self {
        self.outp = OutputOption::Replace;
        self
    }

    pub fn axb(mut self, method: AxbMethod) -> Self {
        self.axb_method = method;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_composes() {
        let d = Descriptor::new()
            .transpose_inp0()
            .complement_mask()
            .replace()
            .axb(AxbMethod::Dot);
        assert_eq!(d.inp0, InputOption::Transpose);
        assert_eq!(d.inp1, InputOption::Default);
        assert!(d.mask.complement);
        assert!(!d.mask.structural);
        assert_eq!(d.outp, OutputOption::Replace);
        assert_eq!(d.axb_method, AxbMethod::Dot);
    }

    #[test]
    fn default_is_all_defaults() {
        let d = Descriptor::default();
        assert_eq!(d, Descriptor::new());
        assert_eq!(d.axb_method, AxbMethod::Default);
    }
}
