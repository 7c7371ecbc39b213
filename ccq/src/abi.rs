//! Encoding calls and decoding their results with a contract's JSON ABI.

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::{Function, JsonAbi},
    primitives::Bytes,
};
use anyhow::{Result, anyhow};

use crate::{query::EthCallData, verify::ResultDecoder};

/// The subset of the WETH9 ABI used by the default query.
pub const WETH_ABI: &str = r#"[
    {"constant":true,"inputs":[],"name":"name","outputs":[{"name":"","type":"string"}],"payable":false,"stateMutability":"view","type":"function"},
    {"constant":true,"inputs":[],"name":"totalSupply","outputs":[{"name":"","type":"uint256"}],"payable":false,"stateMutability":"view","type":"function"}
]"#;

#[derive(Debug, Clone)]
pub struct AbiDecoder {
    abi: JsonAbi,
}

impl AbiDecoder {
    pub fn new(abi: JsonAbi) -> Self {
        AbiDecoder { abi }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(AbiDecoder::new(serde_json::from_str(json)?))
    }

    pub fn weth() -> Result<Self> {
        Self::from_json(WETH_ABI)
    }

    /// Call data for the zero argument method `name`.
    pub fn encode_call(&self, name: &str) -> Result<Bytes> {
        let function = self
            .abi
            .function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.is_empty()))
            .ok_or_else(|| anyhow!("no zero argument method named {name} in ABI"))?;
        Ok(function.abi_encode_input(&[])?.into())
    }

    /// The function whose selector prefixes `data`.
    pub fn function_for(&self, data: &[u8]) -> Result<&Function> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| anyhow!("call data is too short to contain a selector"))?;
        self.abi
            .functions()
            .find(|f| f.selector().0 == selector)
            .ok_or_else(|| anyhow!("no method with selector 0x{} in ABI", hex::encode(selector)))
    }
}

impl ResultDecoder for AbiDecoder {
    type Output = Vec<DynSolValue>;

    fn decode(&self, call: &EthCallData, result: &[u8]) -> Result<Vec<DynSolValue>> {
        let function = self.function_for(&call.data)?;
        function
            .abi_decode_output(result, true)
            .map_err(|e| anyhow!("failed to decode result of {}: {e}", function.name))
    }
}
