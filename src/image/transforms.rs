use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};

/// 图像变换工具集
pub struct ImageTransforms;

impl ImageTransforms {
    /// 面积插值缩放（INTER_AREA 风格）。
    ///
    /// 每个输出像素取其覆盖的源像素区域按覆盖面积加权的均值，行列可分离计算，
    /// 放大时退化为按覆盖比例的近邻混合。结果四舍五入到8位。
    pub fn resize_area(image: &Array3<u8>, target_height: usize, target_width: usize) -> Array3<u8> {
        let (orig_h, orig_w, channels) = image.dim();
        if (orig_h, orig_w) == (target_height, target_width) {
            return image.clone();
        }

        let col_weights = area_weights(orig_w, target_width);
        let row_weights = area_weights(orig_h, target_height);

        // 先水平方向
        let mut horizontal = Array3::<f32>::zeros((orig_h, target_width, channels));
        for h in 0..orig_h {
            for (w, taps) in col_weights.iter().enumerate() {
                for c in 0..channels {
                    let mut acc = 0.0f32;
                    for &(src, weight) in taps {
                        acc += image[[h, src, c]] as f32 * weight;
                    }
                    horizontal[[h, w, c]] = acc;
                }
            }
        }

        // 再垂直方向
        let mut resized = Array3::<u8>::zeros((target_height, target_width, channels));
        for (h, taps) in row_weights.iter().enumerate() {
            for w in 0..target_width {
                for c in 0..channels {
                    let mut acc = 0.0f32;
                    for &(src, weight) in taps {
                        acc += horizontal[[src, w, c]] * weight;
                    }
                    resized[[h, w, c]] = acc.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        resized
    }

    /// 双线性插值缩放二维图（像素中心对齐）
    pub fn resize_bilinear(map: ArrayView2<'_, f32>, target_height: usize, target_width: usize) -> Array2<f32> {
        let (orig_h, orig_w) = map.dim();
        let mut resized = Array2::<f32>::zeros((target_height, target_width));
        if orig_h == 0 || orig_w == 0 {
            return resized;
        }

        let scale_h = orig_h as f32 / target_height as f32;
        let scale_w = orig_w as f32 / target_width as f32;

        for h in 0..target_height {
            let (h1, h2, dh) = bilinear_taps(h, scale_h, orig_h);
            for w in 0..target_width {
                let (w1, w2, dw) = bilinear_taps(w, scale_w, orig_w);

                let v11 = map[[h1, w1]];
                let v12 = map[[h1, w2]];
                let v21 = map[[h2, w1]];
                let v22 = map[[h2, w2]];

                resized[[h, w]] = v11 * (1.0 - dh) * (1.0 - dw)
                    + v12 * (1.0 - dh) * dw
                    + v21 * dh * (1.0 - dw)
                    + v22 * dh * dw;
            }
        }

        resized
    }

    /// 水平镜像
    pub fn flip_horizontal(image: ArrayView3<'_, f32>) -> Array3<f32> {
        let mut flipped = Array3::<f32>::zeros(image.dim());
        flipped.assign(&image.slice(s![.., ..;-1, ..]));
        flipped
    }

    /// 绕图像中心旋转（角度为正时逆时针），双线性采样，越界填0，尺寸不变
    pub fn rotate(image: ArrayView3<'_, f32>, angle_degrees: f32) -> Array3<f32> {
        let (height, width, channels) = image.dim();
        if angle_degrees.abs() < f32::EPSILON {
            return image.to_owned();
        }

        let theta = angle_degrees.to_radians();
        let (sin, cos) = theta.sin_cos();
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;

        let mut rotated = Array3::<f32>::zeros((height, width, channels));
        for y in 0..height {
            for x in 0..width {
                // 反向映射：目标坐标 -> 源坐标
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                let src_x = cos * dx - sin * dy + cx;
                let src_y = sin * dx + cos * dy + cy;

                for c in 0..channels {
                    rotated[[y, x, c]] = sample_bilinear(&image, src_y, src_x, c);
                }
            }
        }

        rotated
    }
}

/// 每个输出索引对应的 (源索引, 权重) 列表，权重和为1
fn area_weights(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src_len as f64);
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len);

            let mut taps = Vec::with_capacity(last.saturating_sub(first));
            for s in first..last {
                let overlap = (end.min((s + 1) as f64) - start.max(s as f64)).max(0.0);
                if overlap > 0.0 {
                    taps.push((s, (overlap / (end - start)) as f32));
                }
            }
            taps
        })
        .collect()
}

fn bilinear_taps(dst: usize, scale: f32, src_len: usize) -> (usize, usize, f32) {
    let src = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f32);
    let i1 = src.floor() as usize;
    let i2 = (i1 + 1).min(src_len - 1);
    (i1, i2, src - i1 as f32)
}

/// 常数0边界的双线性采样
fn sample_bilinear(image: &ArrayView3<'_, f32>, y: f32, x: f32, c: usize) -> f32 {
    let (height, width, _) = image.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;

    let fetch = |yy: f32, xx: f32| -> f32 {
        if yy < 0.0 || xx < 0.0 || yy >= height as f32 || xx >= width as f32 {
            0.0
        } else {
            image[[yy as usize, xx as usize, c]]
        }
    };

    fetch(y0, x0) * (1.0 - dx) * (1.0 - dy)
        + fetch(y0, x0 + 1.0) * dx * (1.0 - dy)
        + fetch(y0 + 1.0, x0) * (1.0 - dx) * dy
        + fetch(y0 + 1.0, x0 + 1.0) * dx * dy
}
