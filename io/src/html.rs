//! Self-contained HTML viewer output.
//!
//! Template substitution only: the splat data embeds as base64-encoded
//! compressed PLY, and the camera vectors come from the write options.

use std::io::Write;

use splat_core::column::DataTable;

use crate::{compressed_ply, ply, Result, WriteOptions};

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Splat Viewer</title>
    <style>
        body { margin: 0; overflow: hidden; background: #101014; }
        #app-canvas { width: 100%; height: 100%; display: block; }
    </style>
    <script type="importmap">
        { "imports": { "playcanvas": "https://cdn.jsdelivr.net/npm/playcanvas@2/build/playcanvas.mjs" } }
    </script>
</head>
<body>
    <canvas id="app-canvas"></canvas>
    <script type="module">
        import { Application, Asset, Color, Entity, FILLMODE_FILL_WINDOW, RESOLUTION_AUTO } from 'playcanvas';

        const settings = {
            cameraPosition: [{{cameraPosition}}],
            cameraTarget: [{{cameraTarget}}],
        };

        const base64 = "{{splatData}}";
        const binary = atob(base64);
        const bytes = new Uint8Array(binary.length);
        for (let i = 0; i < binary.length; i++) {
            bytes[i] = binary.charCodeAt(i);
        }

        const canvas = document.getElementById('app-canvas');
        const app = new Application(canvas);
        app.setCanvasFillMode(FILLMODE_FILL_WINDOW);
        app.setCanvasResolution(RESOLUTION_AUTO);
        window.addEventListener('resize', () => app.resizeCanvas());

        const asset = new Asset('scene.compressed.ply', 'gsplat', {
            url: URL.createObjectURL(new Blob([bytes], { type: 'application/octet-stream' })),
            filename: 'scene.compressed.ply',
        });
        asset.on('load', () => {
            const splat = new Entity('splat');
            splat.addComponent('gsplat', { asset });
            app.root.addChild(splat);
        });
        app.assets.add(asset);
        app.assets.load(asset);

        const camera = new Entity('camera');
        camera.addComponent('camera', { clearColor: new Color(0.06, 0.06, 0.08) });
        camera.setPosition(...settings.cameraPosition);
        camera.lookAt(...settings.cameraTarget);
        app.root.addChild(camera);

        app.start();
    </script>
</body>
</html>
"#;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let word = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        for slot in 0..4 {
            if slot <= chunk.len() {
                out.push(BASE64_ALPHABET[((word >> (18 - slot * 6)) & 0x3f) as usize] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

fn vector_literal(v: &[f64; 3]) -> String {
    format!("{}, {}, {}", v[0], v[1], v[2])
}

pub fn write<W: Write>(writer: &mut W, table: &DataTable, options: &WriteOptions) -> Result<()> {
    let file = compressed_ply::encode(table, Vec::new())?;
    let mut data = Vec::new();
    ply::write_ply(&mut data, &file)?;

    let page = TEMPLATE
        .replace("{{splatData}}", &base64_encode(&data))
        .replace("{{cameraPosition}}", &vector_literal(&options.camera_pos))
        .replace("{{cameraTarget}}", &vector_literal(&options.camera_target));
    writer.write_all(page.as_bytes())?;
    Ok(())
}
