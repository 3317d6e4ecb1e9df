/// フィルターストリームの制限設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLimits {
    /// 上流から読み込む入力バッファのサイズ (デフォルト: 32KB)
    pub input_buffer_size: usize,
    /// deflate の zlib ヘッダー判定のために保持する最大バイト数 (デフォルト: 1000 バイト)
    ///
    /// この量を超えて出力が得られない場合は zlib ヘッダー付きとみなし、
    /// リプレイ用のバッファを破棄する。
    pub max_zlib_header_sniff_bytes: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            input_buffer_size: 32 * 1024, // 32KB
            max_zlib_header_sniff_bytes: 1000,
        }
    }
}

impl FilterLimits {
    /// 入力バッファサイズを指定した設定を作成
    ///
    /// 0 を指定した場合は 1 バイトとして扱う。
    pub fn with_input_buffer_size(size: usize) -> Self {
        Self {
            input_buffer_size: size.max(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = FilterLimits::default();
        assert_eq!(limits.input_buffer_size, 32 * 1024);
        assert_eq!(limits.max_zlib_header_sniff_bytes, 1000);
    }

    #[test]
    fn test_with_input_buffer_size_never_zero() {
        assert_eq!(FilterLimits::with_input_buffer_size(0).input_buffer_size, 1);
        assert_eq!(FilterLimits::with_input_buffer_size(7).input_buffer_size, 7);
    }
}
