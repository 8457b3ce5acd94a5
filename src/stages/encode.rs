/// Byte representation a sink writes for a payload
pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);
}

macro_rules! encode_le {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

encode_le!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Encode for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Encode for String {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_little_endian() {
        let mut out = Vec::new();
        1i32.encode(&mut out);
        0x0102u16.encode(&mut out);
        assert_eq!(out, vec![1, 0, 0, 0, 0x02, 0x01]);
    }

    #[test]
    fn test_bytes_and_strings_copied_verbatim() {
        let mut out = Vec::new();
        vec![9u8, 8].encode(&mut out);
        String::from("ok").encode(&mut out);
        assert_eq!(out, vec![9, 8, b'o', b'k']);
    }
}
